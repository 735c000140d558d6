//! Tabular codec — reads uploaded contact lists (CSV or workbook) and writes
//! the augmented `.xlsx` artifact.
//!
//! The codec knows nothing about outreach semantics: it moves `Row`s in and
//! out. Resolution and generation live in `crate::outreach`.

pub mod reader;
pub mod writer;

use serde::Serialize;
use thiserror::Error;

/// Literal values that stand for "no data" in exported contact lists.
/// Compared case-insensitively against the trimmed cell text.
const MISSING_SENTINELS: &[&str] = &["", "nan", "none", "null", "#n/a"];

#[derive(Debug, Error)]
pub enum TableError {
    /// The uploaded table could not be read. Fatal for the request.
    #[error("{0}")]
    Parse(String),

    /// The output workbook could not be encoded. Fatal for the request.
    #[error("{0}")]
    Serialization(String),
}

impl From<rust_xlsxwriter::XlsxError> for TableError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        TableError::Serialization(err.to_string())
    }
}

/// Source format of an uploaded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    Csv,
    Workbook,
}

/// A single scalar value as read from the source table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    /// Stringified, trimmed value. `None` when the cell is empty or holds a
    /// missing sentinel such as `NaN` or `null`.
    pub fn value(&self) -> Option<String> {
        let text = match self {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => format_number(*n),
            Cell::Empty => return None,
        };
        if is_missing_sentinel(&text) {
            None
        } else {
            Some(text)
        }
    }
}

/// One record of the input table. `cells[i]` belongs to column `i` of the
/// table header; rows of one table always have the header's width.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Usable value of column `index`, see [`Cell::value`].
    pub fn value(&self, index: usize) -> Option<String> {
        self.cells.get(index).and_then(Cell::value)
    }

    #[cfg(test)]
    pub fn from_texts(values: &[&str]) -> Self {
        Self::new(
            values
                .iter()
                .map(|v| {
                    if v.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(v.to_string())
                    }
                })
                .collect(),
        )
    }
}

pub fn is_missing_sentinel(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    MISSING_SENTINELS.contains(&lowered.as_str())
}

/// Integral floats print without a fractional part so that a numeric
/// column like `Zip` resolves to `"94107"`, not `"94107.0"`.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
