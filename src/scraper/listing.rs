//! Course schedule listing: one department in one term.

use indexmap::IndexMap;
use regex::Regex;

use super::PortalConfig;
use super::errors::{Cause, RowParseError};
use crate::models::names::last_name_from_link;
use crate::models::normalize_code;
use crate::page::{Cell, Page, PageShapeError, Row, Table};

/// Instructor cells that legitimately carry no link.
const UNASSIGNED: &[&str] = &["tba", "staff", "to be announced"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedCourse {
    /// Data row the course was first seen on.
    pub row: usize,
    pub code: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedProfessor {
    pub row: usize,
    pub last_name: String,
    pub n_number: String,
}

/// A row that could not be turned into a record.
#[derive(Debug)]
pub struct RowFailure {
    pub row: usize,
    /// N-number, when the failure happened after it was known.
    pub n_number: Option<String>,
    pub cause: Cause,
}

impl RowFailure {
    fn new(row: usize, cause: impl Into<Cause>) -> Self {
        Self {
            row,
            n_number: None,
            cause: cause.into(),
        }
    }
}

/// Parsed rows of one listing column, plus the rows that failed.
#[derive(Debug)]
pub struct Parsed<T> {
    pub items: Vec<T>,
    pub failures: Vec<RowFailure>,
}

fn schedule_table(html: &str, column: &str) -> Result<Table, PageShapeError> {
    Page::parse(html).table_with_column(column)
}

/// Distinct courses on a schedule page. Sections of the same course collapse
/// into the first row that listed it.
pub fn parse_courses(
    html: &str,
    portal: &PortalConfig,
) -> Result<Parsed<ListedCourse>, PageShapeError> {
    let table = schedule_table(html, &portal.course_column)?;
    let has_title = table.has_column(&portal.title_column);

    let mut courses: IndexMap<String, ListedCourse> = IndexMap::new();
    let mut failures = Vec::new();
    for (index, row) in table.rows().iter().enumerate() {
        match course_from_row(row, portal, has_title) {
            Ok(Some((code, title))) => {
                courses.entry(code.clone()).or_insert(ListedCourse {
                    row: index,
                    code,
                    title,
                });
            }
            Ok(None) => {}
            Err(cause) => failures.push(RowFailure::new(index, cause)),
        }
    }

    Ok(Parsed {
        items: courses.into_values().collect(),
        failures,
    })
}

fn course_from_row(
    row: &Row,
    portal: &PortalConfig,
    has_title: bool,
) -> Result<Option<(String, String)>, Cause> {
    let cell = row.get(&portal.course_column)?;
    if cell.is_blank() {
        return Ok(None);
    }
    let link = cell.link()?;
    let code = normalize_code(&link.text);
    if code.is_empty() {
        return Err(RowParseError::new(&portal.course_column, &cell.text, "a course code").into());
    }

    let title = if has_title {
        row.text(&portal.title_column)?.to_string()
    } else {
        String::new()
    };
    Ok(Some((code, title)))
}

/// Distinct instructors on a schedule page.
pub fn parse_professors(
    html: &str,
    portal: &PortalConfig,
    instructor_pattern: &Regex,
) -> Result<Parsed<ListedProfessor>, PageShapeError> {
    let table = schedule_table(html, &portal.professor_column)?;

    let mut professors: IndexMap<String, ListedProfessor> = IndexMap::new();
    let mut failures = Vec::new();
    for (index, row) in table.rows().iter().enumerate() {
        let cell = match row.get(&portal.professor_column) {
            Ok(cell) => cell,
            Err(e) => {
                failures.push(RowFailure::new(index, e));
                continue;
            }
        };
        for result in professors_in_cell(cell, index, portal, instructor_pattern) {
            match result {
                Ok(professor) => {
                    professors
                        .entry(professor.n_number.clone())
                        .or_insert(professor);
                }
                Err(failure) => failures.push(failure),
            }
        }
    }

    Ok(Parsed {
        items: professors.into_values().collect(),
        failures,
    })
}

/// A section may list several instructors, one link each.
fn professors_in_cell(
    cell: &Cell,
    row: usize,
    portal: &PortalConfig,
    instructor_pattern: &Regex,
) -> Vec<Result<ListedProfessor, RowFailure>> {
    if cell.links.is_empty() {
        let unassigned = cell.is_blank() || UNASSIGNED.contains(&cell.text.to_lowercase().as_str());
        return if unassigned {
            Vec::new()
        } else {
            vec![Err(RowFailure::new(
                row,
                PageShapeError::element("cell containing an instructor link", &cell.html),
            ))]
        };
    }

    cell.links
        .iter()
        .map(|link| {
            let n_number = instructor_pattern
                .captures(&link.href)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    RowFailure::new(
                        row,
                        Cause::MissingNNumber {
                            href: link.href.clone(),
                        },
                    )
                })?;
            let last_name = last_name_from_link(&link.text).ok_or_else(|| RowFailure {
                row,
                n_number: Some(n_number.clone()),
                cause: RowParseError::new(&portal.professor_column, &link.text, "a last name")
                    .into(),
            })?;
            Ok(ListedProfessor {
                row,
                last_name,
                n_number,
            })
        })
        .collect()
}

/// Full instructor name from the header table of a history page.
pub fn instructor_name(
    html: &str,
    portal: &PortalConfig,
) -> Result<Option<String>, PageShapeError> {
    let page = Page::parse(html);
    let table = page.find(&portal.history_table_selector)?.to_table()?;
    let name = table
        .rows()
        .first()
        .map(|row| row.text(&portal.instructor_column))
        .transpose()?
        .map(str::to_string)
        .filter(|name| !name.is_empty());
    Ok(name)
}
