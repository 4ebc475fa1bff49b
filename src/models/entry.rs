//! ISQ evaluation records.

use serde::{Deserialize, Serialize};

/// Share of respondents per rating, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingBreakdown {
    pub excellent: f32,
    pub very_good: f32,
    pub good: f32,
    pub fair: f32,
    pub poor: f32,
    pub not_applicable: f32,
}

/// Share of enrolled students per final grade, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeDistribution {
    pub a: f32,
    pub a_minus: f32,
    pub b_plus: f32,
    pub b: f32,
    pub b_minus: f32,
    pub c_plus: f32,
    pub c: f32,
    pub d: f32,
    pub f: f32,
    pub withdraw: f32,
}

/// One section's evaluation. Identified by `(course_id, term_id, crn)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub course_id: u64,
    pub professor_id: u64,
    pub term_id: u32,
    pub crn: u32,
    pub enrolled: u32,
    pub responded: u32,
    pub ratings: RatingBreakdown,
    pub grades: GradeDistribution,
    pub mean_gpa: Option<f32>,
}

impl Entry {
    /// Fraction of enrolled students who answered, if anyone was enrolled.
    pub fn response_rate(&self) -> Option<f32> {
        (self.enrolled > 0).then(|| self.responded as f32 / self.enrolled as f32)
    }
}
