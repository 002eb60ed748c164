//! Job execution and check result types.

use sluice_types::wire::Incrementality;

use crate::contract::RunParameters;
use crate::incremental::SyncPlan;
use crate::registry::SourceScheme;

/// Aggregate record counts for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub records_read: u64,
    pub records_written: u64,
}

/// Result of a successful job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub counts: JobCounts,
    pub plan: SyncPlan,
    /// Watermark persisted by this run, if it moved.
    pub watermark: Option<String>,
    pub source_adapter: &'static str,
    pub destination_adapter: &'static str,
    pub duration_secs: f64,
}

/// Result of checking a job without moving data.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub source_kind: SourceScheme,
    pub source_adapter: &'static str,
    pub destination_adapter: &'static str,
    pub incrementality: Incrementality,
    pub plan: SyncPlan,
    pub run_parameters: RunParameters,
}
