//! In-process adapters for driving the engine end to end.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};

use serde_json::json;
use sluice_engine::contract::{BatchIter, ExtractRequest, WriteSummary};
use sluice_engine::{
    CancelToken, ConnectorRegistry, DestinationHandle, Extractable, Loadable, RunParameters,
};
use sluice_types::batch::{option_bool, option_str, Options, Row, RowBatch};
use sluice_types::cursor::CursorValue;
use sluice_types::error::ConnectorError;
use sluice_types::scheme::Location;
use sluice_types::wire::{Incrementality, WriteMode};

static CANCEL_HOOKS: LazyLock<Mutex<HashMap<String, CancelToken>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Register a token that `memory://` sources fire after `cancel_after` batches.
pub fn register_cancel_hook(key: &str, token: &CancelToken) {
    CANCEL_HOOKS
        .lock()
        .unwrap()
        .insert(key.to_string(), token.clone());
}

fn hooked_token(options: &Options, option: &str) -> Option<CancelToken> {
    let key = option_str(options, option)?;
    CANCEL_HOOKS.lock().unwrap().get(key).cloned()
}

fn cancel_hook(options: &Options) -> Option<(CancelToken, usize)> {
    let token = hooked_token(options, "cancel_key")?;
    let after = options.get("cancel_after")?.as_u64()? as usize;
    Some((token, after))
}

fn row(id: u64) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(id));
    row.insert("name".into(), json!(format!("item-{id}")));
    row
}

fn total_rows(uri: &str, default: usize) -> usize {
    Location::parse(uri)
        .ok()
        .and_then(|loc| loc.remainder.parse().ok())
        .unwrap_or(default)
}

/// `memory://<n>`: rows `id = 1..=n`, caller-managed on `id`.
pub struct MemorySource {
    default_rows: usize,
}

impl Extractable for MemorySource {
    fn adapter_id(&self) -> &'static str {
        "memory"
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
        let n = total_rows(uri, self.default_rows) as u64;
        let rows: Vec<Row> = (1..=n)
            .map(row)
            .filter(|r| match &request.watermark {
                Some(w) => CursorValue::from_json(&r["id"], w.cursor_type)
                    .is_some_and(|v| w.admits(&v)),
                None => true,
            })
            .collect();
        let hook = cancel_hook(&request.options);
        let batches: Vec<RowBatch> = rows
            .chunks(request.batch_size)
            .map(|c| RowBatch::new(c.to_vec()))
            .collect();
        Ok(Box::new(batches.into_iter().enumerate().map(
            move |(i, batch)| {
                if let Some((token, after)) = &hook {
                    if i + 1 >= *after {
                        token.cancel();
                    }
                }
                Ok(batch)
            },
        )))
    }
}

/// `feed://<n>`: an adapter-managed offset feed.
pub struct FeedSource {
    default_rows: usize,
}

impl Extractable for FeedSource {
    fn adapter_id(&self) -> &'static str {
        "feed"
    }

    fn incrementality(&self, _uri: &str) -> Incrementality {
        Incrementality::AdapterManaged
    }

    fn produce(
        &self,
        uri: &str,
        _table: &str,
        request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError> {
        let n = total_rows(uri, self.default_rows) as u64;
        let state = request.adapter_state;
        let start = state
            .as_ref()
            .and_then(|s| s.load())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let batch_size = request.batch_size as u64;
        let mut next = start;
        Ok(Box::new(std::iter::from_fn(move || {
            if next >= n {
                return None;
            }
            let end = (next + batch_size).min(n);
            let batch = RowBatch::new(((next + 1)..=end).map(row).collect());
            next = end;
            if let Some(state) = &state {
                if let Err(e) = state.commit(end.to_string()) {
                    return Some(Err(e));
                }
            }
            Some(Ok(batch))
        })))
    }
}

/// `snapshot://<n>`: full refresh only.
pub struct SnapshotSource {
    default_rows: usize,
}

impl Extractable for SnapshotSource {
    fn adapter_id(&self) -> &'static str {
        "snapshot"
    }

    fn incrementality(&self, _uri: &str) -> Incrementality {
        Incrementality::FullRefreshOnly
    }

    fn produce(
        &self,
        uri: &str,
        table: &str,
        mut request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError> {
        request.watermark = None;
        MemorySource {
            default_rows: self.default_rows,
        }
        .produce(uri, table, request)
    }
}

/// `jsonl://<dir>`: stages `<table>.staging`, post-load moves it into `<table>.jsonl`.
///
/// `post_load_cancel_key` names a hooked token fired once the move is done.
pub struct JsonlDestination {
    staged: Option<(PathBuf, PathBuf, WriteMode)>,
    fail_post_load: bool,
    cancel_after_commit: Option<CancelToken>,
}

impl Loadable for JsonlDestination {
    fn adapter_id(&self) -> &'static str {
        "jsonl"
    }

    fn run_parameters(
        &self,
        _uri: &str,
        table: &str,
        _options: &Options,
    ) -> Result<RunParameters, ConnectorError> {
        RunParameters::from_table(table, false)
    }

    fn bind(
        &mut self,
        uri: &str,
        params: &RunParameters,
        options: &Options,
    ) -> Result<Box<dyn DestinationHandle>, ConnectorError> {
        let dir = PathBuf::from(
            Location::parse(uri)
                .map_err(|e| ConnectorError::config("BAD_URI", e.to_string()))?
                .remainder,
        );
        let staging = dir.join(format!("{}.staging", params.table));
        let target = dir.join(format!("{}.jsonl", params.table));
        let file = File::create(&staging).map_err(|e| ConnectorError::io("CREATE", e.to_string()))?;
        self.fail_post_load = option_bool(options, "fail_post_load").unwrap_or(false);
        self.cancel_after_commit = hooked_token(options, "post_load_cancel_key");
        self.staged = Some((staging, target, params.write_mode.clone()));
        Ok(Box::new(JsonlHandle {
            writer: BufWriter::new(file),
            written: 0,
        }))
    }

    fn post_load(&mut self) -> Result<(), ConnectorError> {
        if self.fail_post_load {
            return Err(ConnectorError::transient_db("MERGE_FAILED", "target locked"));
        }
        let (staging, target, mode) = self
            .staged
            .take()
            .ok_or_else(|| ConnectorError::internal("NOT_BOUND", "post_load before bind"))?;
        let staged = std::fs::read(&staging).map_err(|e| ConnectorError::io("READ", e.to_string()))?;
        let mut out = match mode {
            WriteMode::Replace => File::create(&target),
            _ => OpenOptions::new().create(true).append(true).open(&target),
        }
        .map_err(|e| ConnectorError::io("OPEN", e.to_string()))?;
        out.write_all(&staged)
            .map_err(|e| ConnectorError::io("WRITE", e.to_string()))?;
        std::fs::remove_file(&staging).map_err(|e| ConnectorError::io("CLEANUP", e.to_string()))?;
        if let Some(token) = &self.cancel_after_commit {
            token.cancel();
        }
        Ok(())
    }
}

struct JsonlHandle {
    writer: BufWriter<File>,
    written: u64,
}

impl DestinationHandle for JsonlHandle {
    fn write(&mut self, batch: &RowBatch) -> Result<(), ConnectorError> {
        for row in batch.rows() {
            serde_json::to_writer(&mut self.writer, row)
                .map_err(|e| ConnectorError::io("WRITE", e.to_string()))?;
            self.writer
                .write_all(b"\n")
                .map_err(|e| ConnectorError::io("WRITE", e.to_string()))?;
            self.written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<WriteSummary, ConnectorError> {
        self.writer
            .flush()
            .map_err(|e| ConnectorError::io("FLUSH", e.to_string()))?;
        Ok(WriteSummary {
            records_written: self.written,
        })
    }
}

fn memory() -> Box<dyn Extractable> {
    Box::new(MemorySource { default_rows: 5 })
}

fn feed() -> Box<dyn Extractable> {
    Box::new(FeedSource { default_rows: 5 })
}

fn snapshot() -> Box<dyn Extractable> {
    Box::new(SnapshotSource { default_rows: 5 })
}

fn jsonl() -> Box<dyn Loadable> {
    Box::new(JsonlDestination {
        staged: None,
        fail_post_load: false,
        cancel_after_commit: None,
    })
}

pub fn registry() -> ConnectorRegistry {
    ConnectorRegistry::builder()
        .source("memory", memory)
        .source("feed", feed)
        .source("snapshot", snapshot)
        .destination("jsonl", jsonl)
        .build()
        .unwrap()
}

/// Rows in `<dir>/<table>.jsonl`.
pub fn loaded_ids(dir: &std::path::Path, table: &str) -> Vec<u64> {
    let Ok(content) = std::fs::read_to_string(dir.join(format!("{table}.jsonl"))) else {
        return Vec::new();
    };
    content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].as_u64().unwrap())
        .collect()
}
