//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for watermarks and run
//! history. Model types live in [`sluice_types::state`].

use sluice_types::state::{CursorState, PipelineId, RunRecord, RunStats, RunStatus, StreamName};

use crate::error;

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
/// Every write must be durable when the call returns.
pub trait StateBackend: Send + Sync {
    /// Read the current watermark for a (pipeline, stream) pair.
    ///
    /// Returns `Ok(None)` when no watermark has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
    ) -> error::Result<Option<CursorState>>;

    /// Upsert the watermark for a (pipeline, stream) pair unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_cursor(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        cursor: &CursorState,
    ) -> error::Result<()>;

    /// Compare-and-set: replace the watermark only if its stored value matches `expected`.
    ///
    /// Returns `true` if the update was applied, `false` if the current value didn't match.
    /// When `expected` is `None`, succeeds only if no value has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn compare_and_set(
        &self,
        pipeline: &PipelineId,
        stream: &StreamName,
        expected: Option<&str>,
        new: &CursorState,
    ) -> error::Result<bool>;

    /// Begin a new sync run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId, stream: &StreamName) -> error::Result<i64>;

    /// Finalize a sync run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats)
        -> error::Result<()>;

    /// Look up one run-history row.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_run(&self, run_id: i64) -> error::Result<Option<RunRecord>>;
}
