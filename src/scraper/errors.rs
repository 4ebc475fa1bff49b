//! Error types for the crawl.
//!
//! Row- and unit-level failures become [`ScrapeError`]s in the shared
//! [`ErrorSink`] and the crawl continues. Only a failure on the department or
//! term list is fatal.

use crossbeam::queue::SegQueue;
use tracing::warn;

use crate::http::FetchError;
use crate::page::PageShapeError;
use crate::reconcile::StoreError;

/// A single field of a scraped row could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("column `{column}`: cannot parse `{value}` as {expected}")]
pub struct RowParseError {
    pub column: String,
    pub value: String,
    pub expected: &'static str,
}

impl RowParseError {
    pub fn new(column: &str, value: &str, expected: &'static str) -> Self {
        Self {
            column: column.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

/// The underlying reason a unit or row failed.
#[derive(Debug, thiserror::Error)]
pub enum Cause {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Shape(#[from] PageShapeError),
    #[error(transparent)]
    Row(#[from] RowParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("instructor link `{href}` carries no N-number")]
    MissingNNumber { href: String },
    #[error("no course was listed as {code} in term {term_id}")]
    UnknownCourse { code: String, term_id: u32 },
    #[error("term `{name}` is not a recognizable term")]
    UnknownTerm { name: String },
}

/// A failure with the crawl context it happened in.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("failed to scrape the department list: {cause}")]
    Department {
        #[source]
        cause: Cause,
    },
    #[error("failed to scrape the term list: {cause}")]
    Term {
        #[source]
        cause: Cause,
    },
    #[error("course listing (department {department_id}, term {term_id}, row {row:?}): {cause}")]
    Course {
        department_id: u32,
        term_id: u32,
        /// Data row index, when the failure is confined to one row.
        row: Option<usize>,
        #[source]
        cause: Cause,
    },
    #[error(
        "professor listing (department {department_id}, term {term_id}, \
         n-number {n_number:?}): {cause}"
    )]
    Professor {
        department_id: u32,
        term_id: u32,
        n_number: Option<String>,
        #[source]
        cause: Cause,
    },
    #[error("entry history of {n_number} (row {row:?}): {cause}")]
    Entry {
        n_number: String,
        row: Option<usize>,
        #[source]
        cause: Cause,
    },
}

impl ScrapeError {
    pub fn cause(&self) -> &Cause {
        match self {
            Self::Department { cause }
            | Self::Term { cause }
            | Self::Course { cause, .. }
            | Self::Professor { cause, .. }
            | Self::Entry { cause, .. } => cause,
        }
    }

    /// Short kind label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Department { .. } => "department",
            Self::Term { .. } => "term",
            Self::Course { .. } => "course",
            Self::Professor { .. } => "professor",
            Self::Entry { .. } => "entry",
        }
    }
}

/// Lock-free, append-only collection of non-fatal errors shared by every task.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: SegQueue<ScrapeError>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: ScrapeError) {
        warn!(kind = error.kind(), error = %error, "Scrape error recorded");
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Take every error recorded so far.
    pub fn drain(&self) -> Vec<ScrapeError> {
        std::iter::from_fn(|| self.errors.pop()).collect()
    }
}
