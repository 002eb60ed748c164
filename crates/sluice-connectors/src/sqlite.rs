//! `SQLite` destination.
//!
//! Rows are staged into `_sluice_staging_<table>` while the job runs.
//! [`Loadable::post_load`] merges the staging table into the target in a
//! single transaction and drops it, so a failed job never touches the
//! target table.

use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::Value;
use sluice_engine::contract::WriteSummary;
use sluice_engine::{DestinationHandle, Loadable, RunParameters};
use sluice_types::batch::{Options, RowBatch};
use sluice_types::error::ConnectorError;
use sluice_types::wire::WriteMode;

use crate::path::sqlalchemy_path;

const STAGING_PREFIX: &str = "_sluice_staging_";

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn stage_err(e: &rusqlite::Error) -> ConnectorError {
    ConnectorError::transient_db("SQLITE_STAGE", e.to_string())
}

fn merge_err(e: &rusqlite::Error) -> ConnectorError {
    ConnectorError::transient_db("MERGE_FAILED", e.to_string())
}

fn open(path: &Path) -> Result<Connection, ConnectorError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConnectorError::io("SQLITE_OPEN", format!("{}: {e}", parent.display())))?;
    }
    Connection::open(path).map_err(|e| {
        ConnectorError::transient_db("SQLITE_OPEN", format!("{}: {e}", path.display()))
    })
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn table_columns(conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(name)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Create `name` with untyped columns, or add the ones it lacks.
fn ensure_columns(
    conn: &Connection,
    name: &str,
    existing: &mut Vec<String>,
    wanted: &[String],
) -> rusqlite::Result<()> {
    if existing.is_empty() && !table_exists(conn, name)? {
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({})",
            quote(name),
            column_list(wanted)
        ))?;
        existing.extend(wanted.iter().cloned());
        return Ok(());
    }
    for column in wanted {
        if !existing.contains(column) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote(name),
                quote(column)
            ))?;
            existing.push(column.clone());
        }
    }
    Ok(())
}

fn sql_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

struct Staged {
    path: PathBuf,
    target: String,
    staging: String,
    write_mode: WriteMode,
}

/// `sqlite:///<path>` destination with append, replace and upsert.
#[derive(Default)]
pub struct SqliteDestination {
    staged: Option<Staged>,
}

impl Loadable for SqliteDestination {
    fn adapter_id(&self) -> &'static str {
        "sqlite"
    }

    fn run_parameters(
        &self,
        uri: &str,
        table: &str,
        _options: &Options,
    ) -> Result<RunParameters, ConnectorError> {
        let mut params = RunParameters::from_table(table, false)?;
        if let Some(dataset) = params.dataset.as_deref() {
            if dataset != "main" {
                return Err(ConnectorError::config(
                    "DATASET_UNSUPPORTED",
                    format!("sqlite destinations write to the main schema, got '{dataset}'"),
                ));
            }
        }
        params.extra.insert(
            "path".into(),
            Value::String(sqlalchemy_path(uri)?.display().to_string()),
        );
        params.extra.insert(
            "staging_table".into(),
            Value::String(format!("{STAGING_PREFIX}{}", params.table)),
        );
        Ok(params)
    }

    fn bind(
        &mut self,
        uri: &str,
        params: &RunParameters,
        _options: &Options,
    ) -> Result<Box<dyn DestinationHandle>, ConnectorError> {
        let path = sqlalchemy_path(uri)?;
        let conn = open(&path)?;
        let staging = format!("{STAGING_PREFIX}{}", params.table);
        // Leftovers from an earlier failed run.
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&staging)))
            .map_err(|e| stage_err(&e))?;

        tracing::debug!(path = %path.display(), staging = %staging, "Staging into SQLite");
        self.staged = Some(Staged {
            path,
            target: params.table.clone(),
            staging: staging.clone(),
            write_mode: params.write_mode.clone(),
        });
        Ok(Box::new(SqliteHandle {
            conn,
            staging,
            columns: Vec::new(),
            written: 0,
        }))
    }

    fn post_load(&mut self) -> Result<(), ConnectorError> {
        let Some(staged) = self.staged.take() else {
            return Err(ConnectorError::internal(
                "NOT_BOUND",
                "post_load called before bind",
            ));
        };
        let mut conn = open(&staged.path)?;
        let tx = conn.transaction().map_err(|e| merge_err(&e))?;
        merge(&tx, &staged)?;
        tx.commit().map_err(|e| merge_err(&e))?;
        tracing::debug!(
            target_table = %staged.target,
            mode = staged.write_mode.as_str(),
            "SQLite merge committed"
        );
        Ok(())
    }
}

fn merge(tx: &Transaction<'_>, staged: &Staged) -> Result<(), ConnectorError> {
    let target = quote(&staged.target);
    let staging = quote(&staged.staging);

    if !table_exists(tx, &staged.staging).map_err(|e| merge_err(&e))? {
        // No rows were written.
        if staged.write_mode == WriteMode::Replace
            && table_exists(tx, &staged.target).map_err(|e| merge_err(&e))?
        {
            tx.execute_batch(&format!("DELETE FROM {target}"))
                .map_err(|e| merge_err(&e))?;
        }
        return Ok(());
    }

    let columns = table_columns(tx, &staged.staging).map_err(|e| merge_err(&e))?;
    let mut target_columns = table_columns(tx, &staged.target).map_err(|e| merge_err(&e))?;
    ensure_columns(tx, &staged.target, &mut target_columns, &columns)
        .map_err(|e| merge_err(&e))?;
    let cols = column_list(&columns);

    let sql = match &staged.write_mode {
        WriteMode::Append => format!("INSERT INTO {target} ({cols}) SELECT {cols} FROM {staging}"),
        WriteMode::Replace => format!(
            "DELETE FROM {target}; INSERT INTO {target} ({cols}) SELECT {cols} FROM {staging}"
        ),
        WriteMode::Upsert { primary_key } => {
            if let Some(missing) = primary_key.iter().find(|k| !columns.contains(k)) {
                return Err(ConnectorError::data(
                    "PRIMARY_KEY_MISSING",
                    format!("primary key column '{missing}' is not present in the loaded rows"),
                ));
            }
            let matches = primary_key
                .iter()
                .map(|k| format!("s.{c} IS {target}.{c}", c = quote(k)))
                .collect::<Vec<_>>()
                .join(" AND ");
            let group = column_list(primary_key);
            format!(
                "DELETE FROM {target} WHERE EXISTS (SELECT 1 FROM {staging} s WHERE {matches}); \
                 INSERT INTO {target} ({cols}) SELECT {cols} FROM {staging} \
                 WHERE rowid IN (SELECT MAX(rowid) FROM {staging} GROUP BY {group})"
            )
        }
    };
    tx.execute_batch(&format!("{sql}; DROP TABLE {staging}"))
        .map_err(|e| merge_err(&e))
}

struct SqliteHandle {
    conn: Connection,
    staging: String,
    columns: Vec<String>,
    written: u64,
}

impl DestinationHandle for SqliteHandle {
    fn write(&mut self, batch: &RowBatch) -> Result<(), ConnectorError> {
        if batch.is_empty() {
            return Ok(());
        }
        let wanted = batch.columns();
        let tx = self.conn.transaction().map_err(|e| stage_err(&e))?;
        ensure_columns(&tx, &self.staging, &mut self.columns, &wanted)
            .map_err(|e| stage_err(&e))?;

        let placeholders = (1..=wanted.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    quote(&self.staging),
                    column_list(&wanted)
                ))
                .map_err(|e| stage_err(&e))?;
            for row in batch.rows() {
                let values = wanted.iter().map(|c| sql_value(row.get(c)));
                stmt.execute(rusqlite::params_from_iter(values))
                    .map_err(|e| stage_err(&e))?;
            }
        }
        tx.commit().map_err(|e| stage_err(&e))?;
        self.written += batch.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<WriteSummary, ConnectorError> {
        Ok(WriteSummary {
            records_written: self.written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_types::batch::Row;

    fn row(id: i64, name: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(id));
        row.insert("name".into(), json!(name));
        row
    }

    fn load(uri: &str, table: &str, mode: WriteMode, rows: Vec<Row>) -> Result<(), ConnectorError> {
        let mut dest = SqliteDestination::default();
        let params = dest
            .run_parameters(uri, table, &Options::new())?
            .with_write_mode(mode);
        let mut handle = dest.bind(uri, &params, &Options::new())?;
        if !rows.is_empty() {
            handle.write(&RowBatch::new(rows))?;
        }
        handle.finish()?;
        drop(handle);
        dest.post_load()
    }

    fn dump(path: &Path, table: &str) -> Vec<(i64, String)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare(&format!("SELECT id, name FROM {} ORDER BY id", quote(table)))
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    fn setup() -> (tempfile::TempDir, PathBuf, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("w.db");
        let uri = format!("sqlite:///{}", path.display());
        (dir, path, uri)
    }

    #[test]
    fn append_then_replace() {
        let (_dir, path, uri) = setup();
        load(&uri, "orders", WriteMode::Append, vec![row(1, "a")]).unwrap();
        load(&uri, "main.orders", WriteMode::Append, vec![row(2, "b")]).unwrap();
        assert_eq!(dump(&path, "orders"), vec![(1, "a".into()), (2, "b".into())]);

        load(&uri, "orders", WriteMode::Replace, vec![row(3, "c")]).unwrap();
        assert_eq!(dump(&path, "orders"), vec![(3, "c".into())]);

        let conn = Connection::open(&path).unwrap();
        assert!(!table_exists(&conn, "_sluice_staging_orders").unwrap());
    }

    #[test]
    fn upsert_keeps_last_row_per_key() {
        let (_dir, path, uri) = setup();
        let pk = WriteMode::Upsert {
            primary_key: vec!["id".into()],
        };
        load(&uri, "t", pk.clone(), vec![row(1, "a"), row(2, "b")]).unwrap();
        load(&uri, "t", pk, vec![row(2, "x"), row(3, "c"), row(2, "y")]).unwrap();
        assert_eq!(
            dump(&path, "t"),
            vec![(1, "a".into()), (2, "y".into()), (3, "c".into())]
        );
    }

    #[test]
    fn upsert_without_key_column_fails_and_leaves_target() {
        let (_dir, path, uri) = setup();
        load(&uri, "t", WriteMode::Append, vec![row(1, "a")]).unwrap();
        let err = load(
            &uri,
            "t",
            WriteMode::Upsert {
                primary_key: vec!["code".into()],
            },
            vec![row(2, "b")],
        )
        .unwrap_err();
        assert_eq!(err.code, "PRIMARY_KEY_MISSING");
        assert_eq!(dump(&path, "t"), vec![(1, "a".into())]);
    }

    #[test]
    fn replace_with_no_rows_empties_target() {
        let (_dir, path, uri) = setup();
        load(&uri, "t", WriteMode::Append, vec![row(1, "a")]).unwrap();
        load(&uri, "t", WriteMode::Replace, vec![]).unwrap();
        assert!(dump(&path, "t").is_empty());
    }

    #[test]
    fn new_columns_are_added_to_target() {
        let (_dir, path, uri) = setup();
        load(&uri, "t", WriteMode::Append, vec![row(1, "a")]).unwrap();
        let mut wider = row(2, "b");
        wider.insert("flag".into(), json!(true));
        load(&uri, "t", WriteMode::Append, vec![wider]).unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(table_columns(&conn, "t").unwrap(), vec!["id", "name", "flag"]);
        let flag: Option<i64> = conn
            .query_row("SELECT flag FROM t WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(flag, Some(1));
    }

    #[test]
    fn staged_rows_stay_out_of_target_until_post_load() {
        let (_dir, path, uri) = setup();
        let mut dest = SqliteDestination::default();
        let params = dest.run_parameters(&uri, "t", &Options::new()).unwrap();
        let mut handle = dest.bind(&uri, &params, &Options::new()).unwrap();
        handle.write(&RowBatch::new(vec![row(1, "a")])).unwrap();
        drop(handle);

        let conn = Connection::open(&path).unwrap();
        assert!(!table_exists(&conn, "t").unwrap());
        assert!(table_exists(&conn, "_sluice_staging_t").unwrap());
    }

    #[test]
    fn other_schemas_are_rejected() {
        let err = SqliteDestination::default()
            .run_parameters("sqlite:///w.db", "analytics.t", &Options::new())
            .unwrap_err();
        assert_eq!(err.code, "DATASET_UNSUPPORTED");
    }
}
