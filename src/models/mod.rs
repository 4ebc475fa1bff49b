//! Scraped domain objects.
//!
//! Department and term ids come from the portal. Course and professor ids are
//! surrogates handed out by the reconciler on insert; a freshly scraped record
//! carries id `0` until then.

pub mod course;
pub mod entry;
pub mod names;
pub mod term;

pub use course::{Course, Versioned, normalize_code};
pub use entry::{Entry, GradeDistribution, RatingBreakdown};
pub use term::{Season, Term};

use serde::{Deserialize, Serialize};

/// An academic department as listed on the selection page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: u32,
    pub name: String,
}

impl Department {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An instructor, unique within a department by N-number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professor {
    pub id: u64,
    pub department_id: u32,
    pub first_name: String,
    pub last_name: String,
    /// Portal instructor identifier, e.g. `N00123456`.
    pub n_number: String,
}

impl Professor {
    pub fn new(
        department_id: u32,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        n_number: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            department_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            n_number: n_number.into(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.first_name.is_empty() {
            self.last_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}
