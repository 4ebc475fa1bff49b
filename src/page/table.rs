//! Owned table extraction.
//!
//! Leading rows made only of `<th>` cells are header rows; the last of them
//! supplies the column titles. A title that appears twice maps to its first
//! column. Cells with `colspan` are repeated once per spanned column so
//! positional access matches the header layout.

use std::sync::{Arc, LazyLock};

use html_scraper::{ElementRef, Selector};
use indexmap::IndexMap;

use super::{Element, PageShapeError};
use crate::utils::collapse_whitespace;

/// Colspans beyond this are treated as malformed and clamped.
const MAX_COLSPAN: usize = 64;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// An anchor inside a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// One table cell, copied out of the DOM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub links: Vec<Link>,
    pub html: String,
}

impl Cell {
    fn from_element(element: &ElementRef<'_>) -> Self {
        let links = element
            .select(&LINK_SELECTOR)
            .filter_map(|a| {
                Some(Link {
                    text: collapse_whitespace(&a.text().collect::<String>()),
                    href: a.value().attr("href")?.trim().to_string(),
                })
            })
            .collect();

        Self {
            text: collapse_whitespace(&element.text().collect::<String>()),
            links,
            html: element.html(),
        }
    }

    /// True for cells with no visible text and no links (`&nbsp;` included).
    pub fn is_blank(&self) -> bool {
        self.text.is_empty() && self.links.is_empty()
    }

    /// The cell's first link.
    pub fn link(&self) -> Result<&Link, PageShapeError> {
        self.links
            .first()
            .ok_or_else(|| PageShapeError::element("cell containing a link", &self.html))
    }
}

type ColumnMap = Arc<IndexMap<String, usize>>;

/// A data row. Cells are addressable by column title or position.
#[derive(Debug, Clone)]
pub struct Row {
    cells: Vec<Cell>,
    columns: ColumnMap,
}

impl Row {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell at a logical column position.
    pub fn at(&self, index: usize) -> Result<&Cell, PageShapeError> {
        self.cells
            .get(index)
            .ok_or(PageShapeError::ColumnOutOfRange {
                index,
                len: self.cells.len(),
            })
    }

    /// Cell under the column titled `title`.
    pub fn get(&self, title: &str) -> Result<&Cell, PageShapeError> {
        if self.columns.is_empty() {
            return Err(PageShapeError::Headerless {
                title: title.to_string(),
            });
        }
        let index = *self
            .columns
            .get(title)
            .ok_or_else(|| PageShapeError::MissingColumn {
                title: title.to_string(),
            })?;
        self.at(index)
    }

    /// Text of the cell under `title`.
    pub fn text(&self, title: &str) -> Result<&str, PageShapeError> {
        self.get(title).map(|cell| cell.text.as_str())
    }
}

/// A table copied out of the DOM.
#[derive(Debug, Clone)]
pub struct Table {
    titles: Vec<String>,
    columns: ColumnMap,
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn from_element(table: Element<'_>) -> Self {
        let mut raw_rows = table_rows(table.inner()).into_iter().peekable();

        let mut titles = Vec::new();
        while let Some(cells) = raw_rows.peek() {
            let is_header = !cells.is_empty() && cells.iter().all(|c| c.value().name() == "th");
            if !is_header {
                break;
            }
            titles = expand(cells, |c| collapse_whitespace(&c.text().collect::<String>()));
            raw_rows.next();
        }

        let mut columns = IndexMap::with_capacity(titles.len());
        for (index, title) in titles.iter().enumerate() {
            columns.entry(title.clone()).or_insert(index);
        }
        let columns = Arc::new(columns);

        let rows = raw_rows
            .filter(|cells| !cells.is_empty())
            .map(|cells| Row {
                cells: expand(&cells, Cell::from_element),
                columns: Arc::clone(&columns),
            })
            .collect();

        Self {
            titles,
            columns,
            rows,
        }
    }

    /// Column titles in header order, duplicates included. Empty when headerless.
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn is_headerless(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn has_column(&self, title: &str) -> bool {
        self.columns.contains_key(title)
    }

    /// Index of the column titled `title` (first occurrence).
    pub fn column(&self, title: &str) -> Result<usize, PageShapeError> {
        if self.is_headerless() {
            return Err(PageShapeError::Headerless {
                title: title.to_string(),
            });
        }
        self.columns
            .get(title)
            .copied()
            .ok_or_else(|| PageShapeError::MissingColumn {
                title: title.to_string(),
            })
    }

    /// Fails naming the first title the table lacks.
    pub fn require_columns(&self, titles: &[&str]) -> Result<(), PageShapeError> {
        titles.iter().try_for_each(|title| self.column(title).map(drop))
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Cells of one column, top to bottom; rows too short for it are skipped.
    pub fn column_cells(&self, title: &str) -> Result<Vec<&Cell>, PageShapeError> {
        let index = self.column(title)?;
        Ok(self.rows.iter().filter_map(|row| row.cells.get(index)).collect())
    }
}

/// `<tr>` rows of a table, looking through `thead`/`tbody`/`tfoot` but not into
/// nested tables. Each row is its `th`/`td` children.
fn table_rows(table: ElementRef<'_>) -> Vec<Vec<ElementRef<'_>>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(row_cells(child)),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr")
                    .map(row_cells),
            ),
            _ => {}
        }
    }
    rows
}

fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "th" | "td"))
        .collect()
}

fn colspan(cell: &ElementRef<'_>) -> usize {
    cell.value()
        .attr("colspan")
        .and_then(|span| span.trim().parse::<usize>().ok())
        .filter(|span| *span > 0)
        .unwrap_or(1)
        .min(MAX_COLSPAN)
}

/// Map each cell, repeating the result once per spanned column.
fn expand<T: Clone>(cells: &[ElementRef<'_>], map: impl Fn(&ElementRef<'_>) -> T) -> Vec<T> {
    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        let value = map(cell);
        let span = colspan(cell);
        out.extend(std::iter::repeat_n(value, span));
    }
    out
}
