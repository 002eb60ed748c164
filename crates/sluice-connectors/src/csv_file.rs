//! Local CSV files as a source and a destination.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde_json::Value;
use sluice_engine::contract::{BatchIter, ExtractRequest, WriteSummary};
use sluice_engine::{DestinationHandle, Extractable, Loadable, RunParameters};
use sluice_types::batch::{option_str, Options, Row, RowBatch};
use sluice_types::cursor::{CursorValue, Watermark};
use sluice_types::error::ConnectorError;
use sluice_types::wire::{Incrementality, WriteMode};

use crate::path::file_path;

static NULL: Value = Value::Null;

fn delimiter(options: &Options, default: u8) -> Result<u8, ConnectorError> {
    match option_str(options, "delimiter") {
        None => Ok(default),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(d) => Err(ConnectorError::config(
            "INVALID_DELIMITER",
            format!("delimiter must be a single byte, got '{d}'"),
        )),
    }
}

fn csv_err(code: &str, path: &Path, e: &csv::Error) -> ConnectorError {
    ConnectorError::io(code, format!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// `csv://<path>`: streams a local CSV file with a header row.
///
/// Cells are read as strings; empty cells become `null`.
pub struct CsvSource {
    delimiter: u8,
}

impl Default for CsvSource {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl Extractable for CsvSource {
    fn adapter_id(&self) -> &'static str {
        "csv"
    }

    fn incrementality(&self, _uri: &str) -> Incrementality {
        Incrementality::CallerManaged
    }

    fn produce(
        &self,
        uri: &str,
        _table: &str,
        request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError> {
        let path = file_path(uri)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter(&request.options, self.delimiter)?)
            .from_path(&path)
            .map_err(|e| csv_err("CSV_OPEN", &path, &e))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| csv_err("CSV_HEADER", &path, &e))?
            .iter()
            .map(str::to_string)
            .collect();

        if let Some(watermark) = &request.watermark {
            if !headers.contains(&watermark.cursor_field) {
                return Err(ConnectorError::config(
                    "CURSOR_FIELD_MISSING",
                    format!(
                        "cursor column '{}' not found in {}",
                        watermark.cursor_field,
                        path.display()
                    ),
                ));
            }
        }

        tracing::debug!(path = %path.display(), columns = headers.len(), "Reading CSV");
        Ok(Box::new(CsvBatches {
            reader,
            path,
            headers,
            watermark: request.watermark,
            batch_size: request.batch_size.max(1),
            record: csv::StringRecord::new(),
            done: false,
        }))
    }
}

struct CsvBatches {
    reader: csv::Reader<File>,
    path: PathBuf,
    headers: Vec<String>,
    watermark: Option<Watermark>,
    batch_size: usize,
    record: csv::StringRecord,
    done: bool,
}

impl CsvBatches {
    fn to_row(&self) -> Row {
        self.headers
            .iter()
            .zip(self.record.iter())
            .map(|(name, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn admits(&self, row: &Row) -> Result<bool, ConnectorError> {
        let Some(watermark) = &self.watermark else {
            return Ok(true);
        };
        let cell = row.get(&watermark.cursor_field).unwrap_or(&NULL);
        let value = CursorValue::from_json(cell, watermark.cursor_type).ok_or_else(|| {
            ConnectorError::data(
                "CURSOR_TYPE_MISMATCH",
                format!(
                    "value {cell} in '{}' is not a valid {}",
                    watermark.cursor_field,
                    watermark.cursor_type.as_str()
                ),
            )
        })?;
        Ok(watermark.admits(&value))
    }
}

impl Iterator for CsvBatches {
    type Item = Result<RowBatch, ConnectorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    let row = self.to_row();
                    match self.admits(&row) {
                        Ok(true) => rows.push(row),
                        Ok(false) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(csv_err("CSV_READ", &self.path, &e)));
                }
            }
        }
        (!rows.is_empty()).then(|| Ok(RowBatch::new(rows)))
    }
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

struct StagedCsv {
    staging: PathBuf,
    target: PathBuf,
    write_mode: WriteMode,
}

/// `csv://<path>`: writes `<path>.staging`, then appends to or replaces
/// `<path>` in post-load.
pub struct CsvDestination {
    delimiter: u8,
    staged: Option<StagedCsv>,
}

impl Default for CsvDestination {
    fn default() -> Self {
        Self {
            delimiter: b',',
            staged: None,
        }
    }
}

impl CsvDestination {
    fn staging_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".staging");
        PathBuf::from(name)
    }

    fn append_into(&self, staged: &StagedCsv) -> Result<(), ConnectorError> {
        let mut staging = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&staged.staging)
            .map_err(|e| csv_err("CSV_OPEN", &staged.staging, &e))?;
        let mut target_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&staged.target)
            .map_err(|e| csv_err("CSV_OPEN", &staged.target, &e))?;

        let staged_header = staging
            .headers()
            .map_err(|e| csv_err("CSV_HEADER", &staged.staging, &e))?
            .clone();
        let target_header = target_reader
            .headers()
            .map_err(|e| csv_err("CSV_HEADER", &staged.target, &e))?;
        if &staged_header != target_header {
            return Err(ConnectorError::data(
                "HEADER_MISMATCH",
                format!(
                    "columns {:?} do not match existing {} columns {:?}",
                    staged_header.iter().collect::<Vec<_>>(),
                    staged.target.display(),
                    target_header.iter().collect::<Vec<_>>()
                ),
            ));
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&staged.target)
            .map_err(|e| ConnectorError::io("CSV_OPEN", e.to_string()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_writer(file);
        for record in staging.records() {
            let record = record.map_err(|e| csv_err("CSV_READ", &staged.staging, &e))?;
            writer
                .write_record(&record)
                .map_err(|e| csv_err("CSV_WRITE", &staged.target, &e))?;
        }
        writer
            .flush()
            .map_err(|e| ConnectorError::io("CSV_FLUSH", e.to_string()))?;
        std::fs::remove_file(&staged.staging)
            .map_err(|e| ConnectorError::io("CSV_CLEANUP", e.to_string()))
    }
}

fn is_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).map_or(true, |m| m.len() == 0)
}

impl Loadable for CsvDestination {
    fn adapter_id(&self) -> &'static str {
        "csv"
    }

    fn run_parameters(
        &self,
        uri: &str,
        table: &str,
        _options: &Options,
    ) -> Result<RunParameters, ConnectorError> {
        let mut params = RunParameters::from_table(table, false)?;
        params.extra.insert(
            "path".into(),
            Value::String(file_path(uri)?.display().to_string()),
        );
        Ok(params)
    }

    fn bind(
        &mut self,
        uri: &str,
        params: &RunParameters,
        options: &Options,
    ) -> Result<Box<dyn DestinationHandle>, ConnectorError> {
        if let WriteMode::Upsert { .. } = params.write_mode {
            return Err(ConnectorError::config(
                "UPSERT_UNSUPPORTED",
                "csv destination supports append and replace only",
            ));
        }
        self.delimiter = delimiter(options, self.delimiter)?;
        let target = file_path(uri)?;
        let staging = Self::staging_path(&target);
        let writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&staging)
            .map_err(|e| csv_err("CSV_CREATE", &staging, &e))?;

        self.staged = Some(StagedCsv {
            staging,
            target,
            write_mode: params.write_mode.clone(),
        });
        Ok(Box::new(CsvHandle {
            writer,
            header: None,
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

        let replace = staged.write_mode == WriteMode::Replace || is_empty_file(&staged.target);
        if replace {
            std::fs::rename(&staged.staging, &staged.target)
                .map_err(|e| ConnectorError::io("CSV_RENAME", e.to_string()))?;
        } else if is_empty_file(&staged.staging) {
            std::fs::remove_file(&staged.staging)
                .map_err(|e| ConnectorError::io("CSV_CLEANUP", e.to_string()))?;
        } else {
            self.append_into(&staged)?;
        }
        tracing::debug!(target = %staged.target.display(), mode = staged.write_mode.as_str(), "CSV finalized");
        Ok(())
    }
}

struct CsvHandle {
    writer: csv::Writer<File>,
    header: Option<Vec<String>>,
    written: u64,
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl DestinationHandle for CsvHandle {
    fn write(&mut self, batch: &RowBatch) -> Result<(), ConnectorError> {
        match &self.header {
            Some(header) => {
                if let Some(extra) = batch.columns().into_iter().find(|c| !header.contains(c)) {
                    return Err(ConnectorError::data(
                        "SCHEMA_DRIFT",
                        format!("column '{extra}' appeared after the csv header was written"),
                    ));
                }
            }
            None => {
                let columns = batch.columns();
                self.writer
                    .write_record(&columns)
                    .map_err(|e| ConnectorError::io("CSV_WRITE", e.to_string()))?;
                self.header = Some(columns);
            }
        }
        let header = self.header.as_deref().unwrap_or_default();
        for row in batch.rows() {
            self.writer
                .write_record(header.iter().map(|name| cell(row.get(name))))
                .map_err(|e| ConnectorError::io("CSV_WRITE", e.to_string()))?;
            self.written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<WriteSummary, ConnectorError> {
        self.writer
            .flush()
            .map_err(|e| ConnectorError::io("CSV_FLUSH", e.to_string()))?;
        Ok(WriteSummary {
            records_written: self.written,
        })
    }
}
