//! Job configuration types deserialized from YAML.

use serde::Deserialize;
use sluice_types::batch::Options;
use sluice_types::cursor::CursorType;
use sluice_types::state::PipelineId;
use sluice_types::wire::{SyncMode, WriteMode};

use crate::contract::DEFAULT_BATCH_SIZE;
use crate::incremental::SyncRequest;
use crate::orchestrator::JobSpec;

/// Top-level job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub version: String,
    pub job: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Where rows come from.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub uri: String,
    pub table: String,
    #[serde(default)]
    pub options: Options,
}

/// Where rows go.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub uri: String,
    /// Defaults to the source table.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub write_mode: JobWriteMode,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

/// Write mode as spelled in YAML or on the command line; upsert keys live in
/// `primary_key`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JobWriteMode {
    #[default]
    Append,
    Replace,
    Upsert,
}

/// Incremental settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub cursor_type: CursorType,
    #[serde(default)]
    pub full_refresh_fallback: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::FullRefresh,
            cursor_field: None,
            cursor_type: CursorType::default(),
            full_refresh_fallback: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// State backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database path for `SQLite`.
    #[serde(default)]
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

impl JobConfig {
    /// Effective write mode, combining `write_mode` with `primary_key`.
    #[must_use]
    pub fn write_mode(&self) -> WriteMode {
        match self.destination.write_mode {
            JobWriteMode::Append => WriteMode::Append,
            JobWriteMode::Replace => WriteMode::Replace,
            JobWriteMode::Upsert => WriteMode::Upsert {
                primary_key: self.destination.primary_key.clone(),
            },
        }
    }

    /// Lower the YAML shape into a runnable [`JobSpec`].
    #[must_use]
    pub fn to_job_spec(&self) -> JobSpec {
        JobSpec {
            pipeline: PipelineId::new(self.job.clone()),
            source_uri: self.source.uri.clone(),
            source_table: self.source.table.clone(),
            dest_uri: self.destination.uri.clone(),
            dest_table: self
                .destination
                .table
                .clone()
                .unwrap_or_else(|| self.source.table.clone()),
            source_options: self.source.options.clone(),
            dest_options: self.destination.options.clone(),
            sync: SyncRequest {
                mode: self.sync.mode,
                cursor_field: self.sync.cursor_field.clone(),
                cursor_type: self.sync.cursor_type,
                full_refresh_fallback: self.sync.full_refresh_fallback,
            },
            write_mode: self.write_mode(),
            batch_size: self.sync.batch_size,
        }
    }
}
