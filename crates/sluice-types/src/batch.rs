//! Row batches and adapter option maps.

use serde::{Deserialize, Serialize};

/// Adapter-specific options (the keyword arguments of an adapter call).
pub type Options = serde_json::Map<String, serde_json::Value>;

/// A single row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Read a string option.
#[must_use]
pub fn option_str<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
    options.get(key).and_then(serde_json::Value::as_str)
}

/// Read a boolean option, accepting `true`/`false` strings as well.
#[must_use]
pub fn option_bool(options: &Options, key: &str) -> Option<bool> {
    match options.get(key)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// An ordered group of rows pulled from a source in one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    rows: Vec<Row>,
}

impl RowBatch {
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Column names in first-seen order across all rows.
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !seen.iter().any(|c| c == key) {
                    seen.push(key.clone());
                }
            }
        }
        seen
    }
}

impl From<Vec<Row>> for RowBatch {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}
