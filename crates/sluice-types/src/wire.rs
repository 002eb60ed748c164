//! Modes and capability values exchanged between the orchestrator and adapters.

use serde::{Deserialize, Serialize};

/// Which side of a transfer a location describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Data is extracted from here.
    Source,
    /// Data is loaded into here.
    Destination,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How data is read from a source table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Read every row on every run.
    #[default]
    FullRefresh,
    /// Read only rows past the last persisted watermark.
    Incremental,
}

/// How data is written to a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert all records (no deduplication).
    #[default]
    Append,
    /// Replace the entire destination table each run.
    Replace,
    /// Merge records by primary key (insert or update).
    Upsert {
        /// Columns forming the primary key for merge matching.
        primary_key: Vec<String>,
    },
}

impl WriteMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Upsert { .. } => "upsert",
        }
    }
}

/// Who tracks the incremental watermark for a source.
///
/// Returned by the source capability query. The same query reports sources
/// that cannot extract incrementally at all, so callers never have a
/// requested watermark silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Incrementality {
    /// The adapter tracks and durably advances its own cursor.
    AdapterManaged,
    /// The orchestrator passes a watermark in and persists the new one.
    CallerManaged,
    /// Only full refresh is supported.
    FullRefreshOnly,
}

impl Incrementality {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdapterManaged => "adapter_managed",
            Self::CallerManaged => "caller_managed",
            Self::FullRefreshOnly => "full_refresh_only",
        }
    }
}

impl std::fmt::Display for Incrementality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_upsert_json_format() {
        let mode = WriteMode::Upsert {
            primary_key: vec!["id".into()],
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["mode"], "upsert");
        assert_eq!(json["primary_key"], serde_json::json!(["id"]));
    }

    #[test]
    fn sync_mode_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncMode::FullRefresh).unwrap(),
            "\"full_refresh\""
        );
    }

    #[test]
    fn side_display() {
        assert_eq!(Side::Source.to_string(), "source");
        assert_eq!(Side::Destination.to_string(), "destination");
    }
}
