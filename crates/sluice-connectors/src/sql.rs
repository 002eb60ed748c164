//! Generic relational source serving every SQL-family scheme.
//!
//! The engine is taken from the location's scheme on each call, so one
//! instance can answer for any family member. Only `SQLite` is executed
//! in-process; the other engines need an external driver.

use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Number, Value};
use sluice_engine::contract::{BatchIter, ExtractRequest};
use sluice_engine::{Extractable, SqlEngine};
use sluice_types::batch::{option_str, Row, RowBatch};
use sluice_types::cursor::{CursorValue, Watermark};
use sluice_types::error::ConnectorError;
use sluice_types::scheme::parse_scheme;
use sluice_types::wire::Incrementality;

use crate::path::sqlalchemy_path;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn engine_of(uri: &str) -> Result<SqlEngine, ConnectorError> {
    let scheme =
        parse_scheme(uri).map_err(|e| ConnectorError::config("INVALID_URI", e.to_string()))?;
    SqlEngine::from_scheme(&scheme.normalized()).ok_or_else(|| {
        ConnectorError::config(
            "UNSUPPORTED_ENGINE",
            format!("'{}' is not a SQL-family scheme", scheme.as_str()),
        )
    })
}

/// Who tracks the watermark for a given engine.
#[must_use]
pub fn engine_incrementality(engine: SqlEngine) -> Incrementality {
    match engine {
        SqlEngine::Hana | SqlEngine::Db2 | SqlEngine::Spanner => Incrementality::FullRefreshOnly,
        _ => Incrementality::CallerManaged,
    }
}

/// Quote one identifier, or each part of a dotted `schema.table`.
#[must_use]
pub fn quote_identifier(engine: SqlEngine, ident: &str) -> String {
    let (open, close) = match engine {
        SqlEngine::MySql | SqlEngine::BigQuery | SqlEngine::Databricks | SqlEngine::ClickHouse => {
            ('`', '`')
        }
        SqlEngine::MsSql => ('[', ']'),
        _ => ('"', '"'),
    };
    ident
        .split('.')
        .map(|part| {
            let escaped = part.replace(close, &format!("{close}{close}"));
            format!("{open}{escaped}{close}")
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Bind placeholder for the `n`th (1-based) parameter.
#[must_use]
pub fn placeholder(engine: SqlEngine, n: usize) -> String {
    match engine {
        SqlEngine::Postgres | SqlEngine::Redshift | SqlEngine::CrateDb | SqlEngine::DuckDb => {
            format!("${n}")
        }
        SqlEngine::Oracle => format!(":{n}"),
        SqlEngine::MsSql | SqlEngine::BigQuery => format!("@p{n}"),
        SqlEngine::Sqlite => format!("?{n}"),
        _ => "?".to_string(),
    }
}

/// Extraction query for `table`.
///
/// With a watermark the range is closed at the lower bound, so rows equal
/// to the last value are read again. Incremental reads are ordered by the
/// cursor column.
#[must_use]
pub fn build_query(engine: SqlEngine, table: &str, watermark: Option<&Watermark>) -> String {
    let mut sql = format!("SELECT * FROM {}", quote_identifier(engine, table));
    if let Some(wm) = watermark {
        let column = quote_identifier(engine, &wm.cursor_field);
        if lower_bound(wm).is_some() {
            sql.push_str(&format!(" WHERE {column} >= {}", placeholder(engine, 1)));
        }
        sql.push_str(&format!(" ORDER BY {column}"));
    }
    sql
}

/// [`build_query`] with `rowid` appended to the ordering, so `LIMIT`/`OFFSET`
/// pages stay stable when cursor values tie. Tables without a rowid (views,
/// `WITHOUT ROWID`) keep the plain query.
fn sqlite_paged_query(conn: &Connection, table: &str, watermark: Option<&Watermark>) -> String {
    let query = build_query(SqlEngine::Sqlite, table, watermark);
    let rowid_check = format!(
        "SELECT rowid FROM {} LIMIT 0",
        quote_identifier(SqlEngine::Sqlite, table)
    );
    if conn.prepare(&rowid_check).is_err() {
        return query;
    }
    if watermark.is_some() {
        format!("{query}, rowid")
    } else {
        format!("{query} ORDER BY rowid")
    }
}

fn lower_bound(watermark: &Watermark) -> Option<&CursorValue> {
    watermark
        .last_value
        .as_ref()
        .filter(|v| **v != CursorValue::Null)
}

/// Source adapter for the whole SQL family.
pub struct SqlSource {
    busy_timeout: Duration,
}

impl Default for SqlSource {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl Extractable for SqlSource {
    fn adapter_id(&self) -> &'static str {
        "sql"
    }

    fn incrementality(&self, uri: &str) -> Incrementality {
        engine_of(uri).map_or(Incrementality::CallerManaged, engine_incrementality)
    }

    fn produce(
        &self,
        uri: &str,
        table: &str,
        request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError> {
        let engine = engine_of(uri)?;
        if engine != SqlEngine::Sqlite {
            return Err(ConnectorError::config(
                "DRIVER_UNAVAILABLE",
                format!("no {engine} driver is linked into this build"),
            ));
        }

        let busy_timeout = match option_str(&request.options, "busy_timeout_ms") {
            Some(raw) => raw.parse().map(Duration::from_millis).map_err(|_| {
                ConnectorError::config(
                    "INVALID_OPTION",
                    format!("busy_timeout_ms must be an integer, got '{raw}'"),
                )
            })?,
            None => self.busy_timeout,
        };

        let path = sqlalchemy_path(uri)?;
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            ConnectorError::transient_db("SQLITE_OPEN", format!("{}: {e}", path.display()))
        })?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| ConnectorError::transient_db("SQLITE_OPEN", e.to_string()))?;

        let query = sqlite_paged_query(&conn, table, request.watermark.as_ref());
        let bound = request
            .watermark
            .as_ref()
            .and_then(lower_bound)
            .map(bind_value);
        tracing::debug!(path = %path.display(), query = %query, "Reading SQLite table");

        Ok(Box::new(SqlitePager {
            conn,
            query,
            bound,
            page_size: request.batch_size.max(1),
            offset: 0,
            done: false,
        }))
    }
}

fn bind_value(value: &CursorValue) -> SqlValue {
    match value {
        CursorValue::Null => SqlValue::Null,
        CursorValue::Int64 { value } => SqlValue::Integer(*value),
        CursorValue::Decimal { value } => value
            .parse::<f64>()
            .map_or_else(|_| SqlValue::Text(value.clone()), SqlValue::Real),
        CursorValue::Utf8 { value } | CursorValue::Timestamp { value } => {
            SqlValue::Text(value.clone())
        }
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}

/// Pages through a query with `LIMIT`/`OFFSET`.
struct SqlitePager {
    conn: Connection,
    query: String,
    bound: Option<SqlValue>,
    page_size: usize,
    offset: usize,
    done: bool,
}

impl SqlitePager {
    fn fetch_page(&mut self) -> Result<Vec<Row>, rusqlite::Error> {
        let sql = format!("{} LIMIT ?2 OFFSET ?3", self.query);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        #[allow(clippy::cast_possible_wrap)]
        let (limit, offset) = (self.page_size as i64, self.offset as i64);
        // A full read never references ?1; SQLite still counts it, so it is
        // bound to NULL.
        let params = [
            self.bound.clone().unwrap_or(SqlValue::Null),
            SqlValue::Integer(limit),
            SqlValue::Integer(offset),
        ];
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

        let mut page = Vec::with_capacity(self.page_size);
        while let Some(row) = rows.next()? {
            let mut out = Row::new();
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), json_value(row.get_ref(i)?));
            }
            page.push(out);
        }
        Ok(page)
    }
}

impl Iterator for SqlitePager {
    type Item = Result<RowBatch, ConnectorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch_page() {
            Ok(page) => {
                if page.len() < self.page_size {
                    self.done = true;
                }
                self.offset += page.len();
                (!page.is_empty()).then(|| Ok(RowBatch::new(page)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(ConnectorError::transient_db(
                    "SQLITE_QUERY",
                    e.to_string(),
                )))
            }
        }
    }
}
