//! Cursor types for incremental sync position tracking.
//!
//! A watermark marks how far a previous extraction progressed so that the
//! next run only reads newer rows.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Data type of a cursor column.
///
/// Determines how cursor values are parsed and compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// 64-bit signed integer cursor.
    Int64,
    /// UTF-8 string cursor, compared lexicographically.
    Utf8,
    /// Date or datetime cursor (RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD`).
    #[default]
    Timestamp,
    /// Decimal cursor carried as text.
    Decimal,
}

impl CursorType {
    /// Wire-format name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Utf8 => "utf8",
            Self::Timestamp => "timestamp",
            Self::Decimal => "decimal",
        }
    }
}

impl std::str::FromStr for CursorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int64" | "int" | "integer" => Ok(Self::Int64),
            "utf8" | "string" | "text" => Ok(Self::Utf8),
            "timestamp" | "datetime" | "date" => Ok(Self::Timestamp),
            "decimal" | "numeric" => Ok(Self::Decimal),
            other => Err(format!("unknown cursor type '{other}'")),
        }
    }
}

/// Typed cursor position value.
///
/// Each variant carries its value in a named `value` field for clean
/// JSON serialization: `{"type": "int64", "value": 42}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorValue {
    /// No cursor value (initial state).
    Null,
    Int64 { value: i64 },
    Utf8 { value: String },
    /// Timestamp kept in its source textual form.
    Timestamp { value: String },
    Decimal { value: String },
}

impl CursorValue {
    /// Parse a stored cursor string as `ty`. Returns `None` if it does not parse.
    #[must_use]
    pub fn parse(raw: &str, ty: CursorType) -> Option<Self> {
        match ty {
            CursorType::Int64 => raw.trim().parse().ok().map(|value| Self::Int64 { value }),
            CursorType::Utf8 => Some(Self::Utf8 {
                value: raw.to_string(),
            }),
            CursorType::Timestamp => parse_timestamp(raw).map(|_| Self::Timestamp {
                value: raw.to_string(),
            }),
            CursorType::Decimal => raw.trim().parse::<f64>().ok().map(|_| Self::Decimal {
                value: raw.trim().to_string(),
            }),
        }
    }

    /// Read a cursor value out of a row cell.
    ///
    /// JSON `null` maps to [`CursorValue::Null`]; cells of the wrong shape
    /// return `None`.
    #[must_use]
    pub fn from_json(cell: &serde_json::Value, ty: CursorType) -> Option<Self> {
        match cell {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::String(s) => Self::parse(s, ty),
            serde_json::Value::Number(n) => match ty {
                CursorType::Int64 => n.as_i64().map(|value| Self::Int64 { value }),
                CursorType::Decimal => Some(Self::Decimal {
                    value: n.to_string(),
                }),
                CursorType::Utf8 => Some(Self::Utf8 {
                    value: n.to_string(),
                }),
                CursorType::Timestamp => None,
            },
            _ => None,
        }
    }

    /// String form persisted by the state backend. `None` for [`CursorValue::Null`].
    #[must_use]
    pub fn to_storage_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int64 { value } => Some(value.to_string()),
            Self::Utf8 { value } | Self::Timestamp { value } | Self::Decimal { value } => {
                Some(value.clone())
            }
        }
    }

    /// Order two values of the same type. `Null` sorts before everything;
    /// values of different types are incomparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Int64 { value: a }, Self::Int64 { value: b }) => Some(a.cmp(b)),
            (Self::Utf8 { value: a }, Self::Utf8 { value: b }) => Some(a.cmp(b)),
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => {
                match (parse_timestamp(a), parse_timestamp(b)) {
                    (Some(x), Some(y)) => Some(x.cmp(&y)),
                    _ => Some(a.cmp(b)),
                }
            }
            (Self::Decimal { value: a }, Self::Decimal { value: b }) => {
                let x = a.parse::<f64>().ok()?;
                let y = b.parse::<f64>().ok()?;
                x.partial_cmp(&y)
            }
            _ => None,
        }
    }
}

/// Normalize the accepted timestamp spellings to a UTC naive datetime.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ndt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Incremental position handed to a caller-managed extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Column used for cursor-based tracking.
    pub cursor_field: String,
    pub cursor_type: CursorType,
    /// Last persisted position (`None` on first run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<CursorValue>,
}

impl Watermark {
    /// Whether a row with this cursor value belongs to the next extraction.
    ///
    /// The range is closed at the start: rows equal to the last value are
    /// re-read, so rows that share the boundary value are never skipped.
    #[must_use]
    pub fn admits(&self, candidate: &CursorValue) -> bool {
        match &self.last_value {
            None | Some(CursorValue::Null) => true,
            Some(last) => matches!(
                candidate.compare(last),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_value_int64_json_format() {
        let cv = CursorValue::Int64 { value: 42 };
        let json = serde_json::to_value(&cv).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int64", "value": 42}));
    }

    #[test]
    fn timestamps_compare_across_spellings() {
        let a = CursorValue::parse("2024-01-15T10:00:00Z", CursorType::Timestamp).unwrap();
        let b = CursorValue::parse("2024-01-15 11:00:00", CursorType::Timestamp).unwrap();
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        let day = CursorValue::parse("2024-01-16", CursorType::Timestamp).unwrap();
        assert_eq!(day.compare(&b), Some(Ordering::Greater));
    }

    #[test]
    fn int_cursor_compares_numerically() {
        let nine = CursorValue::parse("9", CursorType::Int64).unwrap();
        let ten = CursorValue::parse("10", CursorType::Int64).unwrap();
        assert_eq!(nine.compare(&ten), Some(Ordering::Less));
    }

    #[test]
    fn mismatched_types_are_incomparable() {
        let a = CursorValue::Int64 { value: 1 };
        let b = CursorValue::Utf8 { value: "1".into() };
        assert_eq!(a.compare(&b), None);
    }

    #[test]
    fn unparseable_values_are_rejected() {
        assert!(CursorValue::parse("abc", CursorType::Int64).is_none());
        assert!(CursorValue::parse("yesterday", CursorType::Timestamp).is_none());
    }

    #[test]
    fn from_json_reads_numbers_and_strings() {
        let n = CursorValue::from_json(&serde_json::json!(7), CursorType::Int64).unwrap();
        assert_eq!(n, CursorValue::Int64 { value: 7 });
        let s = CursorValue::from_json(&serde_json::json!("7"), CursorType::Int64).unwrap();
        assert_eq!(s, CursorValue::Int64 { value: 7 });
        assert_eq!(
            CursorValue::from_json(&serde_json::Value::Null, CursorType::Int64),
            Some(CursorValue::Null)
        );
    }

    #[test]
    fn watermark_range_is_closed_at_start() {
        let wm = Watermark {
            cursor_field: "id".into(),
            cursor_type: CursorType::Int64,
            last_value: Some(CursorValue::Int64 { value: 5 }),
        };
        assert!(!wm.admits(&CursorValue::Int64 { value: 4 }));
        assert!(wm.admits(&CursorValue::Int64 { value: 5 }));
        assert!(wm.admits(&CursorValue::Int64 { value: 6 }));
    }

    #[test]
    fn first_run_watermark_admits_everything() {
        let wm = Watermark {
            cursor_field: "id".into(),
            cursor_type: CursorType::Int64,
            last_value: None,
        };
        assert!(wm.admits(&CursorValue::Int64 { value: i64::MIN }));
    }

    #[test]
    fn cursor_type_from_str_accepts_aliases() {
        assert_eq!("datetime".parse::<CursorType>().unwrap(), CursorType::Timestamp);
        assert_eq!("INTEGER".parse::<CursorType>().unwrap(), CursorType::Int64);
        assert!("blob".parse::<CursorType>().is_err());
    }
}
