//! Parsed HTML pages with typed, fallible element access.
//!
//! [`Page`] wraps a `scraper` document, which is not `Send`. Callers parse and
//! extract inside synchronous code and carry only owned results (strings,
//! [`Table`]s) across await points.

pub mod table;

pub use table::{Cell, Link, Row, Table};

use std::time::{Duration, Instant};

use html_scraper::{ElementRef, Html, Selector};

use crate::utils::{collapse_whitespace, log_if_slow};

/// Parses slower than this are logged.
const SLOW_PARSE: Duration = Duration::from_millis(250);

/// Longest element snippet carried inside an error.
const SNIPPET_LEN: usize = 160;

/// The page did not have the shape the extractor expected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageShapeError {
    #[error("invalid selector `{selector}`")]
    InvalidSelector { selector: String },
    #[error("no element matches `{selector}`")]
    NotFound { selector: String },
    #[error("malformed page: expected {expected} elements matching `{selector}`, found {found}")]
    Count {
        selector: String,
        expected: usize,
        found: usize,
    },
    #[error("expected {expected}, found `{found}`")]
    Element { expected: String, found: String },
    #[error("table has no column titled `{title}`")]
    MissingColumn { title: String },
    #[error("table has no header row, cannot look up column `{title}`")]
    Headerless { title: String },
    #[error("column {index} is out of range for a row of {len} cells")]
    ColumnOutOfRange { index: usize, len: usize },
}

impl PageShapeError {
    /// Shape mismatch on a concrete element; the element's HTML is truncated.
    pub fn element(expected: impl Into<String>, found: &str) -> Self {
        Self::Element {
            expected: expected.into(),
            found: snippet(found),
        }
    }
}

fn snippet(html: &str) -> String {
    let html = html.trim();
    match html.char_indices().nth(SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &html[..cut]),
        None => html.to_string(),
    }
}

fn parse_selector(selector: &str) -> Result<Selector, PageShapeError> {
    Selector::parse(selector).map_err(|_| PageShapeError::InvalidSelector {
        selector: selector.to_string(),
    })
}

/// A parsed HTML document.
pub struct Page {
    document: Html,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let start = Instant::now();
        let document = Html::parse_document(html);
        log_if_slow(start, SLOW_PARSE, "page parse");
        Self { document }
    }

    /// First element matching `selector`.
    pub fn find(&self, selector: &str) -> Result<Element<'_>, PageShapeError> {
        let parsed = parse_selector(selector)?;
        self.document
            .select(&parsed)
            .next()
            .map(Element)
            .ok_or_else(|| PageShapeError::NotFound {
                selector: selector.to_string(),
            })
    }

    /// Every element matching `selector`, in document order.
    pub fn find_all(&self, selector: &str) -> Result<Vec<Element<'_>>, PageShapeError> {
        let parsed = parse_selector(selector)?;
        Ok(self.document.select(&parsed).map(Element).collect())
    }

    /// Every element matching `selector`, which must match exactly `expected` times.
    pub fn find_exactly(
        &self,
        selector: &str,
        expected: usize,
    ) -> Result<Vec<Element<'_>>, PageShapeError> {
        let found = self.find_all(selector)?;
        if found.len() != expected {
            return Err(PageShapeError::Count {
                selector: selector.to_string(),
                expected,
                found: found.len(),
            });
        }
        Ok(found)
    }

    /// The first table that has a column titled `title`.
    pub fn table_with_column(&self, title: &str) -> Result<Table, PageShapeError> {
        for element in self.find_all("table")? {
            let table = element.to_table()?;
            if table.has_column(title) {
                return Ok(table);
            }
        }
        Err(PageShapeError::NotFound {
            selector: format!("table with a `{title}` column"),
        })
    }
}

/// One option of a `<select>` dropdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

/// An element borrowed from a [`Page`].
#[derive(Clone, Copy)]
pub struct Element<'a>(ElementRef<'a>);

impl<'a> Element<'a> {
    pub(crate) fn inner(&self) -> ElementRef<'a> {
        self.0
    }

    /// Lowercase tag name.
    pub fn name(&self) -> &str {
        self.0.value().name()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.0.value().attr(name)
    }

    /// Text content with whitespace runs collapsed.
    pub fn text(&self) -> String {
        collapse_whitespace(&self.0.text().collect::<String>())
    }

    pub fn html(&self) -> String {
        self.0.html()
    }

    pub fn find(&self, selector: &str) -> Result<Element<'a>, PageShapeError> {
        let parsed = parse_selector(selector)?;
        self.0
            .select(&parsed)
            .next()
            .map(Element)
            .ok_or_else(|| PageShapeError::NotFound {
                selector: selector.to_string(),
            })
    }

    pub fn find_all(&self, selector: &str) -> Result<Vec<Element<'a>>, PageShapeError> {
        let parsed = parse_selector(selector)?;
        Ok(self.0.select(&parsed).map(Element).collect())
    }

    /// Fails with a shape error unless this is a `<tag>` element.
    pub fn expect_tag(&self, tag: &str) -> Result<(), PageShapeError> {
        if self.name().eq_ignore_ascii_case(tag) {
            Ok(())
        } else {
            Err(PageShapeError::element(format!("<{tag}> element"), &self.html()))
        }
    }

    /// Copy this `<table>` out of the DOM.
    pub fn to_table(&self) -> Result<Table, PageShapeError> {
        self.expect_tag("table")?;
        Ok(Table::from_element(*self))
    }

    /// Options of this `<select>`, skipping placeholders without a value.
    pub fn select_options(&self) -> Result<Vec<SelectOption>, PageShapeError> {
        self.expect_tag("select")?;
        Ok(self
            .find_all("option")?
            .into_iter()
            .filter_map(|option| {
                let value = option.attr("value")?.trim();
                if value.is_empty() || value == "%" {
                    return None;
                }
                Some(SelectOption {
                    value: value.to_string(),
                    text: option.text(),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Element").field(&snippet(&self.html())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECTION_PAGE: &str = r#"
        <html><body>
          <select name="pv_dept" id="dept">
            <option value="">-- Select --</option>
            <option value="6502"> Computing &amp; Information Sciences </option>
            <option value="6504">Mathematics</option>
          </select>
          <div class="note">Pick one</div>
        </body></html>
    "#;

    #[test]
    fn find_returns_first_match() {
        let page = Page::parse(SELECTION_PAGE);
        let select = page.find("select#dept").unwrap();
        assert_eq!(select.attr("name"), Some("pv_dept"));
    }

    #[test]
    fn find_missing_names_selector() {
        let page = Page::parse(SELECTION_PAGE);
        let err = page.find("select#term").unwrap_err();
        assert_eq!(
            err,
            PageShapeError::NotFound {
                selector: "select#term".into()
            }
        );
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let page = Page::parse(SELECTION_PAGE);
        assert!(matches!(
            page.find_all("select[").unwrap_err(),
            PageShapeError::InvalidSelector { .. }
        ));
    }

    #[test]
    fn select_options_skip_placeholders() {
        let page = Page::parse(SELECTION_PAGE);
        let options = page.find("select#dept").unwrap().select_options().unwrap();
        assert_eq!(
            options,
            vec![
                SelectOption {
                    value: "6502".into(),
                    text: "Computing & Information Sciences".into()
                },
                SelectOption {
                    value: "6504".into(),
                    text: "Mathematics".into()
                },
            ]
        );
    }

    #[test]
    fn wrong_element_type_is_structured() {
        let page = Page::parse(SELECTION_PAGE);
        let div = page.find("div.note").unwrap();
        match div.to_table().unwrap_err() {
            PageShapeError::Element { expected, found } => {
                assert_eq!(expected, "<table> element");
                assert!(found.contains("Pick one"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn find_exactly_reports_count() {
        let page = Page::parse(SELECTION_PAGE);
        let err = page.find_exactly("option", 6).unwrap_err();
        assert_eq!(
            err,
            PageShapeError::Count {
                selector: "option".into(),
                expected: 6,
                found: 3
            }
        );
        assert!(err.to_string().starts_with("malformed page"));
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "x".repeat(500);
        let PageShapeError::Element { found, .. } = PageShapeError::element("cell", &long) else {
            unreachable!()
        };
        assert_eq!(found.chars().count(), SNIPPET_LEN + 3);
    }
}
