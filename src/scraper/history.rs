//! Instructor history page: ratings and grade distributions per section.

use indexmap::IndexMap;

use super::PortalConfig;
use super::errors::{Cause, RowParseError};
use super::listing::{Parsed, RowFailure};
use crate::models::{GradeDistribution, RatingBreakdown, normalize_code};
use crate::page::{Page, PageShapeError, Row, Table};

/// Tables a history page must carry.
const TABLE_COUNT: usize = 6;
const RATINGS_TABLE: usize = 3;
const GRADES_TABLE: usize = 5;

const TERM: &str = "Term";
const CRN: &str = "CRN";
const COURSE: &str = "Course";
const ENROLLED: &str = "Number Enrolled";
const RESPONDED: &str = "Number Responded";

const RATING_COLUMNS: [&str; 6] = [
    "Excellent (5)",
    "Very Good (4)",
    "Good (3)",
    "Fair (2)",
    "Poor (1)",
    "NR/NA",
];

const GRADE_COLUMNS: [&str; 10] = ["A", "A-", "B+", "B", "B-", "C+", "C", "D", "F", "Withdraw"];
const MEAN_GPA: &str = "Mean GPA";

/// One section, joined across the ratings and grades tables.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    /// Term display name as printed, e.g. `Fall 2019`.
    pub term: String,
    pub crn: u32,
    pub course_code: String,
    pub enrolled: u32,
    pub responded: u32,
    pub ratings: RatingBreakdown,
    pub grades: GradeDistribution,
    pub mean_gpa: Option<f32>,
}

type JoinKey = (String, String, String);

fn join_key(row: &Row) -> Result<JoinKey, PageShapeError> {
    Ok((
        row.text(TERM)?.to_string(),
        row.text(CRN)?.to_string(),
        normalize_code(row.text(COURSE)?),
    ))
}

fn is_blank_row(row: &Row) -> bool {
    row.cells().iter().all(|cell| cell.is_blank())
}

/// Parse both detail tables and inner-join them on (term, CRN, course).
///
/// A missing or misshapen table fails the page. A row that does not parse is
/// reported and the rest of the page is kept. Rows present in only one table
/// are dropped.
pub fn parse_history(
    html: &str,
    portal: &PortalConfig,
) -> Result<Parsed<HistoryRow>, PageShapeError> {
    let (ratings, grades) = detail_tables(html, portal)?;

    let mut failures = Vec::new();
    let mut by_key: IndexMap<JoinKey, &Row> = IndexMap::new();
    for row in grades.rows().iter().filter(|r| !is_blank_row(r)) {
        match join_key(row) {
            Ok(key) => {
                by_key.entry(key).or_insert(row);
            }
            Err(e) => tracing::debug!(error = %e, "Skipping grade row without a join key"),
        }
    }

    let mut items = Vec::new();
    for (index, row) in ratings.rows().iter().enumerate() {
        if is_blank_row(row) {
            continue;
        }
        let key = match join_key(row) {
            Ok(key) => key,
            Err(e) => {
                failures.push(RowFailure {
                    row: index,
                    n_number: None,
                    cause: e.into(),
                });
                continue;
            }
        };
        let Some(grade_row) = by_key.get(&key) else {
            tracing::debug!(
                term = %key.0,
                crn = %key.1,
                course = %key.2,
                "No grade row for section"
            );
            continue;
        };
        match history_row(key, row, grade_row) {
            Ok(parsed) => items.push(parsed),
            Err(cause) => failures.push(RowFailure {
                row: index,
                n_number: None,
                cause,
            }),
        }
    }

    Ok(Parsed { items, failures })
}

fn detail_tables(html: &str, portal: &PortalConfig) -> Result<(Table, Table), PageShapeError> {
    let page = Page::parse(html);
    let tables = page.find_exactly(&portal.history_table_selector, TABLE_COUNT)?;

    let ratings = tables[RATINGS_TABLE].to_table()?;
    let mut required = vec![TERM, CRN, COURSE, ENROLLED, RESPONDED];
    required.extend(RATING_COLUMNS);
    ratings.require_columns(&required)?;

    let grades = tables[GRADES_TABLE].to_table()?;
    let mut required = vec![TERM, CRN, COURSE, MEAN_GPA];
    required.extend(GRADE_COLUMNS);
    grades.require_columns(&required)?;

    Ok((ratings, grades))
}

fn history_row(key: JoinKey, ratings: &Row, grades: &Row) -> Result<HistoryRow, Cause> {
    let (term, crn, course_code) = key;
    let crn = parse_count(CRN, &crn)?;

    let [excellent, very_good, good, fair, poor, not_applicable] =
        percentages(ratings, RATING_COLUMNS)?;
    let [a, a_minus, b_plus, b, b_minus, c_plus, c, d, f, withdraw] =
        percentages(grades, GRADE_COLUMNS)?;

    Ok(HistoryRow {
        term,
        crn,
        course_code,
        enrolled: parse_count(ENROLLED, ratings.text(ENROLLED)?)?,
        responded: parse_count(RESPONDED, ratings.text(RESPONDED)?)?,
        ratings: RatingBreakdown {
            excellent,
            very_good,
            good,
            fair,
            poor,
            not_applicable,
        },
        grades: GradeDistribution {
            a,
            a_minus,
            b_plus,
            b,
            b_minus,
            c_plus,
            c,
            d,
            f,
            withdraw,
        },
        mean_gpa: parse_optional(MEAN_GPA, grades.text(MEAN_GPA)?)?,
    })
}

fn percentages<const N: usize>(row: &Row, columns: [&str; N]) -> Result<[f32; N], Cause> {
    let mut values = [0.0; N];
    for (value, column) in values.iter_mut().zip(columns) {
        *value = parse_optional(column, row.text(column)?)?.unwrap_or(0.0);
    }
    Ok(values)
}

fn parse_count(column: &str, value: &str) -> Result<u32, RowParseError> {
    value
        .replace(',', "")
        .parse()
        .map_err(|_| RowParseError::new(column, value, "a whole number"))
}

/// Blank and `N/A` cells are absent values. A trailing `%` is ignored.
fn parse_optional(column: &str, value: &str) -> Result<Option<f32>, RowParseError> {
    let trimmed = value.trim().trim_end_matches('%').trim_end();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| RowParseError::new(column, value, "a number"))
}
