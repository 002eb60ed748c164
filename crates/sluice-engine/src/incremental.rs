//! Incremental-sync contract.
//!
//! A source reports who owns its watermark through
//! [`Extractable::incrementality`](crate::Extractable::incrementality).
//! [`plan_sync`] reconciles that with what the job asked for, and
//! [`SyncRun`] carries one job through `NotStarted → Extracting →
//! {Succeeded, Failed}` while guarding the watermark:
//!
//! - caller-managed: the run reads the baseline, hands it to the source,
//!   tracks the highest cursor seen and persists it on success;
//! - adapter-managed: the source reads and advances its cursor through an
//!   [`AdapterState`] handle, and the advance becomes durable with the
//!   success transition.
//!
//! Failed and cancelled runs never move the watermark, so a retry starts
//! from the same position as the attempt it replaces.
//!
//! The caller-managed range is closed, so rows at the stored value come back
//! on the next run. Their fingerprints are stored with the watermark and
//! [`SyncRun::dedupe`] drops the ones already delivered.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{self, AtomicBool};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use sluice_state::StateBackend;
use sluice_types::batch::{Options, Row, RowBatch};
use sluice_types::cursor::{CursorType, CursorValue, Watermark};
use sluice_types::error::ConnectorError;
use sluice_types::state::{CursorState, PipelineId, RunStats, RunStatus, StreamName};
use sluice_types::wire::{Incrementality, SyncMode};

use crate::contract::ExtractRequest;
use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, atomic::Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(atomic::Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// What the job asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub mode: SyncMode,
    /// Cursor column for caller-managed sources.
    pub cursor_field: Option<String>,
    pub cursor_type: CursorType,
    /// Downgrade to full refresh instead of failing when the source cannot
    /// extract incrementally.
    pub full_refresh_fallback: bool,
}

impl SyncRequest {
    #[must_use]
    pub fn full_refresh() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn incremental(cursor_field: Option<&str>, cursor_type: CursorType) -> Self {
        Self {
            mode: SyncMode::Incremental,
            cursor_field: cursor_field.map(str::to_string),
            cursor_type,
            full_refresh_fallback: false,
        }
    }
}

/// Who tracks the watermark for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    /// Full refresh: no watermark is read or written.
    None,
    /// The orchestrator filters on and advances `cursor_field`.
    Caller {
        cursor_field: String,
        cursor_type: CursorType,
    },
    /// The source advances its own cursor through [`AdapterState`].
    Adapter,
}

/// Outcome of [`plan_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub incrementality: Incrementality,
    pub tracking: Tracking,
    /// Incremental was requested but the run downgraded to full refresh.
    pub fell_back: bool,
}

impl SyncPlan {
    /// Effective sync mode.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        match self.tracking {
            Tracking::None => SyncMode::FullRefresh,
            Tracking::Caller { .. } | Tracking::Adapter => SyncMode::Incremental,
        }
    }
}

/// Reconcile a source's capability with the requested sync mode.
///
/// # Errors
///
/// - [`PipelineError::Config`] when a caller-managed source has no cursor
///   field, or an adapter-managed source is given one.
/// - [`PipelineError::IncrementalityUnsupported`] when a full-refresh-only
///   source is asked for incremental sync without fallback.
pub fn plan_sync(
    adapter: &str,
    incrementality: Incrementality,
    request: &SyncRequest,
) -> Result<SyncPlan, PipelineError> {
    let plan = |tracking, fell_back| SyncPlan {
        incrementality,
        tracking,
        fell_back,
    };

    if request.mode == SyncMode::FullRefresh {
        return Ok(plan(Tracking::None, false));
    }

    let cursor_field = request
        .cursor_field
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());

    match incrementality {
        Incrementality::CallerManaged => {
            let Some(field) = cursor_field else {
                return Err(PipelineError::Config(format!(
                    "incremental sync from '{adapter}' requires a cursor field"
                )));
            };
            Ok(plan(
                Tracking::Caller {
                    cursor_field: field.to_string(),
                    cursor_type: request.cursor_type,
                },
                false,
            ))
        }
        Incrementality::AdapterManaged => {
            if let Some(field) = cursor_field {
                return Err(PipelineError::Config(format!(
                    "'{adapter}' tracks its own cursor; remove cursor field '{field}'"
                )));
            }
            Ok(plan(Tracking::Adapter, false))
        }
        Incrementality::FullRefreshOnly if request.full_refresh_fallback => {
            tracing::warn!(
                adapter,
                "Source only supports full refresh; falling back from incremental"
            );
            Ok(plan(Tracking::None, true))
        }
        Incrementality::FullRefreshOnly => Err(PipelineError::IncrementalityUnsupported {
            adapter: adapter.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Job phase
// ---------------------------------------------------------------------------

/// Per-job, per-table lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    NotStarted,
    Extracting,
    Succeeded,
    Failed,
}

impl JobPhase {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Extracting)
                | (Self::Extracting, Self::Succeeded | Self::Failed)
        )
    }

    fn transition(self, next: Self) -> Result<Self, PipelineError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "invalid job phase transition {self:?} -> {next:?}"
            )))
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Adapter-owned state
// ---------------------------------------------------------------------------

/// Cursor handle for sources that track their own watermark.
///
/// [`load`](Self::load) returns the last durable value. [`commit`](Self::commit)
/// records the adapter's advance; it becomes durable when the run succeeds
/// and is discarded if the run fails or is cancelled.
#[derive(Clone)]
pub struct AdapterState {
    inner: Arc<AdapterStateInner>,
}

struct AdapterStateInner {
    pipeline: PipelineId,
    stream: StreamName,
    baseline: Option<String>,
    pending: Mutex<Option<String>>,
    cancel: CancelToken,
}

impl AdapterState {
    #[must_use]
    pub fn new(
        pipeline: PipelineId,
        stream: StreamName,
        baseline: Option<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterStateInner {
                pipeline,
                stream,
                baseline,
                pending: Mutex::new(None),
                cancel,
            }),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineId {
        &self.inner.pipeline
    }

    #[must_use]
    pub fn stream(&self) -> &StreamName {
        &self.inner.stream
    }

    /// Last durable cursor, `None` on the first run.
    #[must_use]
    pub fn load(&self) -> Option<&str> {
        self.inner.baseline.as_deref()
    }

    /// Record a cursor advance.
    ///
    /// # Errors
    ///
    /// Refused once the job is cancelled.
    pub fn commit(&self, value: impl Into<String>) -> Result<(), ConnectorError> {
        if self.inner.cancel.is_cancelled() {
            return Err(ConnectorError::internal(
                "JOB_CANCELLED",
                "cursor commit refused: job was cancelled",
            ));
        }
        *self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value.into());
        Ok(())
    }

    /// Advance recorded so far, not yet durable.
    #[must_use]
    pub fn pending(&self) -> Option<String> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_pending(&self) -> Option<String> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterState")
            .field("pipeline", &self.inner.pipeline)
            .field("stream", &self.inner.stream)
            .field("baseline", &self.inner.baseline)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Watermark tracking
// ---------------------------------------------------------------------------

/// SHA-256 of a row's JSON encoding, hex.
#[must_use]
pub fn row_fingerprint(row: &Row) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(row).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Highest cursor value seen across a run's batches, plus the fingerprints
/// of the rows carrying it.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    cursor_field: String,
    cursor_type: CursorType,
    max: Option<CursorValue>,
    boundary: BTreeSet<String>,
}

impl WatermarkTracker {
    #[must_use]
    pub fn new(cursor_field: impl Into<String>, cursor_type: CursorType) -> Self {
        Self {
            cursor_field: cursor_field.into(),
            cursor_type,
            max: None,
            boundary: BTreeSet::new(),
        }
    }

    /// Start from a stored watermark and the rows already delivered at it.
    #[must_use]
    pub fn resume(
        cursor_field: impl Into<String>,
        cursor_type: CursorType,
        last_value: Option<CursorValue>,
        boundary: BTreeSet<String>,
    ) -> Self {
        let boundary = if last_value.is_some() {
            boundary
        } else {
            BTreeSet::new()
        };
        Self {
            cursor_field: cursor_field.into(),
            cursor_type,
            max: last_value,
            boundary,
        }
    }

    /// Fold a batch into the running maximum. Null cursors are skipped.
    ///
    /// # Errors
    ///
    /// Returns a data error when a row lacks the cursor column or carries a
    /// value that is not of the cursor type.
    pub fn observe(&mut self, batch: &RowBatch) -> Result<(), ConnectorError> {
        batch.rows().iter().try_for_each(|row| self.observe_row(row))
    }

    fn observe_row(&mut self, row: &Row) -> Result<(), ConnectorError> {
        let field = &self.cursor_field;
        let cell = row.get(field).ok_or_else(|| {
            ConnectorError::data(
                "CURSOR_FIELD_MISSING",
                format!("row has no cursor column '{field}'"),
            )
        })?;
        let value = CursorValue::from_json(cell, self.cursor_type).ok_or_else(|| {
            ConnectorError::data(
                "CURSOR_TYPE_MISMATCH",
                format!(
                    "value {cell} in cursor column '{field}' is not a valid {}",
                    self.cursor_type.as_str()
                ),
            )
        })?;
        if value == CursorValue::Null {
            return Ok(());
        }

        let ord = match &self.max {
            None => Ordering::Greater,
            Some(current) => value.compare(current).ok_or_else(|| {
                ConnectorError::data(
                    "CURSOR_INCOMPARABLE",
                    format!("cursor values in '{field}' cannot be ordered"),
                )
            })?,
        };
        match ord {
            Ordering::Greater => {
                self.max = Some(value);
                self.boundary.clear();
                self.boundary.insert(row_fingerprint(row));
            }
            Ordering::Equal => {
                self.boundary.insert(row_fingerprint(row));
            }
            Ordering::Less => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn max(&self) -> Option<&CursorValue> {
        self.max.as_ref()
    }

    /// Fingerprints of the rows seen at [`max`](Self::max).
    #[must_use]
    pub fn boundary(&self) -> &BTreeSet<String> {
        &self.boundary
    }
}

// ---------------------------------------------------------------------------
// Sync run
// ---------------------------------------------------------------------------

/// One job's pass over one table, bracketed by run history.
pub struct SyncRun {
    backend: Arc<dyn StateBackend>,
    pipeline: PipelineId,
    stream: StreamName,
    run_id: i64,
    phase: JobPhase,
    plan: SyncPlan,
    baseline: Option<CursorState>,
    watermark: Option<Watermark>,
    delivered: BTreeSet<String>,
    tracker: Option<WatermarkTracker>,
    adapter_state: Option<AdapterState>,
}

impl SyncRun {
    /// Read the baseline watermark and record the run as started.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] on backend failure, or
    /// [`PipelineError::Config`] when the stored watermark does not parse as
    /// the requested cursor type.
    pub fn begin(
        backend: Arc<dyn StateBackend>,
        pipeline: PipelineId,
        stream: StreamName,
        plan: SyncPlan,
        cancel: CancelToken,
    ) -> Result<Self, PipelineError> {
        let baseline = match plan.tracking {
            Tracking::None => None,
            Tracking::Caller { .. } | Tracking::Adapter => {
                backend.get_cursor(&pipeline, &stream)?
            }
        };

        let mut delivered = BTreeSet::new();
        let (watermark, tracker, adapter_state) = match &plan.tracking {
            Tracking::None => (None, None, None),
            Tracking::Caller {
                cursor_field,
                cursor_type,
            } => {
                let watermark = initial_watermark(
                    &pipeline,
                    &stream,
                    cursor_field,
                    *cursor_type,
                    baseline.as_ref(),
                )?;
                if watermark.last_value.is_some() {
                    delivered = baseline
                        .as_ref()
                        .map(|c| c.boundary_rows.iter().cloned().collect())
                        .unwrap_or_default();
                }
                let tracker = WatermarkTracker::resume(
                    cursor_field.clone(),
                    *cursor_type,
                    watermark.last_value.clone(),
                    delivered.clone(),
                );
                (Some(watermark), Some(tracker), None)
            }
            Tracking::Adapter => (
                None,
                None,
                Some(AdapterState::new(
                    pipeline.clone(),
                    stream.clone(),
                    baseline.as_ref().and_then(|c| c.cursor_value.clone()),
                    cancel,
                )),
            ),
        };

        let run_id = backend.start_run(&pipeline, &stream)?;
        let phase = JobPhase::NotStarted.transition(JobPhase::Extracting)?;

        tracing::info!(
            pipeline = pipeline.as_str(),
            stream = stream.as_str(),
            run_id,
            mode = ?plan.mode(),
            incrementality = %plan.incrementality,
            baseline = baseline.as_ref().and_then(|c| c.cursor_value.as_deref()),
            "Sync run started"
        );

        Ok(Self {
            backend,
            pipeline,
            stream,
            run_id,
            phase,
            plan,
            baseline,
            watermark,
            delivered,
            tracker,
            adapter_state,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    #[must_use]
    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    #[must_use]
    pub fn plan(&self) -> &SyncPlan {
        &self.plan
    }

    /// Watermark value persisted before this run started.
    #[must_use]
    pub fn baseline_value(&self) -> Option<&str> {
        self.baseline
            .as_ref()
            .and_then(|c| c.cursor_value.as_deref())
    }

    /// Caller-managed watermark handed to the source.
    #[must_use]
    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    /// Build the source's request for this run.
    #[must_use]
    pub fn extract_request(&self, options: Options, batch_size: usize) -> ExtractRequest {
        ExtractRequest {
            options,
            watermark: self.watermark.clone(),
            adapter_state: self.adapter_state.clone(),
            batch_size,
        }
    }

    /// Drop rows at the stored watermark that an earlier run already loaded.
    ///
    /// Rows whose cursor cannot be read are kept; [`observe`](Self::observe)
    /// reports them.
    #[must_use]
    pub fn dedupe(&self, batch: RowBatch) -> RowBatch {
        let Some(last) = self.watermark.as_ref().and_then(|w| w.last_value.as_ref()) else {
            return batch;
        };
        let Some(tracker) = self.tracker.as_ref() else {
            return batch;
        };
        if self.delivered.is_empty() {
            return batch;
        }
        let before = batch.len();
        let rows: Vec<Row> = batch
            .into_rows()
            .into_iter()
            .filter(|row| {
                let at_boundary = row
                    .get(&tracker.cursor_field)
                    .and_then(|cell| CursorValue::from_json(cell, tracker.cursor_type))
                    .and_then(|value| value.compare(last))
                    == Some(Ordering::Equal);
                !(at_boundary && self.delivered.contains(&row_fingerprint(row)))
            })
            .collect();
        if rows.len() < before {
            tracing::debug!(
                pipeline = self.pipeline.as_str(),
                stream = self.stream.as_str(),
                skipped = before - rows.len(),
                "Skipped rows already loaded at the watermark"
            );
        }
        RowBatch::new(rows)
    }

    /// Track cursor values of a batch that is about to be loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Extract`] when cursor values are missing or
    /// of the wrong type.
    pub fn observe(&mut self, batch: &RowBatch) -> Result<(), PipelineError> {
        match self.tracker.as_mut() {
            Some(tracker) => tracker.observe(batch).map_err(PipelineError::Extract),
            None => Ok(()),
        }
    }

    /// Persist the advanced watermark, then mark the run completed.
    ///
    /// Called once the destination has committed, so a cancellation that
    /// arrives now no longer stops the advance.
    ///
    /// Returns the watermark now stored, if it moved.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::WatermarkConflict`] if another run moved the
    ///   watermark since [`begin`](Self::begin).
    /// - [`PipelineError::State`] on backend failure.
    pub fn succeed(mut self, stats: &RunStats) -> Result<Option<String>, PipelineError> {
        let advanced = self.advanced_cursor();
        if let Some(new) = &advanced {
            let expected = self.baseline_value().map(str::to_string);
            let applied = self.backend.compare_and_set(
                &self.pipeline,
                &self.stream,
                expected.as_deref(),
                new,
            )?;
            if !applied {
                let err = PipelineError::WatermarkConflict {
                    pipeline: self.pipeline.to_string(),
                    stream: self.stream.to_string(),
                    expected,
                };
                self.close(RunStatus::Failed, stats, Some(err.to_string()))?;
                return Err(err);
            }
            tracing::info!(
                pipeline = self.pipeline.as_str(),
                stream = self.stream.as_str(),
                cursor_field = new.cursor_field.as_deref(),
                cursor_value = new.cursor_value.as_deref(),
                "Watermark advanced"
            );
        }

        self.close(RunStatus::Completed, stats, None)?;
        let baseline = self.baseline_value();
        Ok(advanced
            .and_then(|c| c.cursor_value)
            .filter(|value| Some(value.as_str()) != baseline))
    }

    /// Record the run as failed. The watermark is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] on backend failure.
    pub fn fail(mut self, error: &PipelineError, stats: &RunStats) -> Result<(), PipelineError> {
        tracing::warn!(
            pipeline = self.pipeline.as_str(),
            stream = self.stream.as_str(),
            stage = error.stage(),
            error = %error,
            "Sync run failed; watermark unchanged"
        );
        self.close(RunStatus::Failed, stats, Some(error.to_string()))
    }

    /// Record the run as cancelled. The watermark is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::State`] on backend failure.
    pub fn cancel(mut self, stats: &RunStats) -> Result<(), PipelineError> {
        if let Some(state) = &self.adapter_state {
            let _ = state.take_pending();
        }
        tracing::warn!(
            pipeline = self.pipeline.as_str(),
            stream = self.stream.as_str(),
            "Sync run cancelled; watermark unchanged"
        );
        self.close(RunStatus::Cancelled, stats, None)
    }

    fn advanced_cursor(&self) -> Option<CursorState> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        match &self.plan.tracking {
            Tracking::None => None,
            Tracking::Caller { cursor_field, .. } => {
                let tracker = self.tracker.as_ref()?;
                let max = tracker.max()?;
                let last = self.watermark.as_ref().and_then(|w| w.last_value.as_ref());
                if let Some(last) = last {
                    match max.compare(last) {
                        Some(Ordering::Greater) => {}
                        // Same value: persist only newly delivered boundary rows.
                        Some(Ordering::Equal) if tracker.boundary() != &self.delivered => {}
                        _ => return None,
                    }
                }
                Some(CursorState {
                    cursor_field: Some(cursor_field.clone()),
                    cursor_value: max.to_storage_string(),
                    updated_at,
                    boundary_rows: tracker.boundary().iter().cloned().collect(),
                })
            }
            Tracking::Adapter => {
                let value = self.adapter_state.as_ref()?.take_pending()?;
                if self.baseline_value() == Some(value.as_str()) {
                    return None;
                }
                Some(CursorState {
                    cursor_field: None,
                    cursor_value: Some(value),
                    updated_at,
                    boundary_rows: Vec::new(),
                })
            }
        }
    }

    fn close(
        &mut self,
        status: RunStatus,
        stats: &RunStats,
        error_message: Option<String>,
    ) -> Result<(), PipelineError> {
        let next = if status == RunStatus::Completed {
            JobPhase::Succeeded
        } else {
            JobPhase::Failed
        };
        self.phase = self.phase.transition(next)?;
        let stats = RunStats {
            error_message: error_message.or_else(|| stats.error_message.clone()),
            ..stats.clone()
        };
        self.backend.complete_run(self.run_id, status, &stats)?;
        Ok(())
    }
}

impl fmt::Debug for SyncRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRun")
            .field("pipeline", &self.pipeline)
            .field("stream", &self.stream)
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

fn initial_watermark(
    pipeline: &PipelineId,
    stream: &StreamName,
    cursor_field: &str,
    cursor_type: CursorType,
    baseline: Option<&CursorState>,
) -> Result<Watermark, PipelineError> {
    let stored = baseline.and_then(|c| c.cursor_value.as_deref().map(|v| (c.cursor_field.as_deref(), v)));
    let last_value = match stored {
        None => None,
        Some((Some(field), _)) if field != cursor_field => {
            tracing::warn!(
                pipeline = pipeline.as_str(),
                stream = stream.as_str(),
                stored_field = field,
                cursor_field,
                "Cursor field changed; extracting from the beginning"
            );
            None
        }
        Some((_, raw)) => Some(CursorValue::parse(raw, cursor_type).ok_or_else(|| {
            PipelineError::Config(format!(
                "stored watermark '{raw}' for {pipeline}/{stream} is not a valid {}",
                cursor_type.as_str()
            ))
        })?),
    };
    Ok(Watermark {
        cursor_field: cursor_field.to_string(),
        cursor_type,
        last_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_state::SqliteStateBackend;

    fn backend() -> Arc<dyn StateBackend> {
        Arc::new(SqliteStateBackend::in_memory().unwrap())
    }

    fn batch(values: &[serde_json::Value]) -> RowBatch {
        values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert("id".into(), v.clone());
                row
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn caller_plan() -> SyncPlan {
        plan_sync(
            "csv",
            Incrementality::CallerManaged,
            &SyncRequest::incremental(Some("id"), CursorType::Int64),
        )
        .unwrap()
    }

    fn ids() -> (PipelineId, StreamName) {
        (PipelineId::new("p"), StreamName::new("orders"))
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_full_refresh_never_tracks() {
        for inc in [
            Incrementality::AdapterManaged,
            Incrementality::CallerManaged,
            Incrementality::FullRefreshOnly,
        ] {
            let plan = plan_sync("x", inc, &SyncRequest::full_refresh()).unwrap();
            assert_eq!(plan.tracking, Tracking::None);
            assert_eq!(plan.mode(), SyncMode::FullRefresh);
            assert!(!plan.fell_back);
        }
    }

    #[test]
    fn test_caller_managed_requires_cursor_field() {
        let err = plan_sync(
            "csv",
            Incrementality::CallerManaged,
            &SyncRequest::incremental(None, CursorType::Int64),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = plan_sync(
            "csv",
            Incrementality::CallerManaged,
            &SyncRequest::incremental(Some("  "), CursorType::Int64),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_adapter_managed_rejects_cursor_field() {
        let err = plan_sync(
            "stripe",
            Incrementality::AdapterManaged,
            &SyncRequest::incremental(Some("created"), CursorType::Timestamp),
        )
        .unwrap_err();
        assert!(err.to_string().contains("created"));

        let plan = plan_sync(
            "stripe",
            Incrementality::AdapterManaged,
            &SyncRequest::incremental(None, CursorType::Timestamp),
        )
        .unwrap();
        assert_eq!(plan.tracking, Tracking::Adapter);
    }

    #[test]
    fn test_full_refresh_only_rejects_or_falls_back() {
        let mut request = SyncRequest::incremental(Some("id"), CursorType::Int64);
        let err = plan_sync("sql:spanner", Incrementality::FullRefreshOnly, &request).unwrap_err();
        assert!(err.is_recoverable());

        request.full_refresh_fallback = true;
        let plan = plan_sync("sql:spanner", Incrementality::FullRefreshOnly, &request).unwrap();
        assert!(plan.fell_back);
        assert_eq!(plan.mode(), SyncMode::FullRefresh);
    }

    #[test]
    fn test_job_phase_transitions() {
        assert!(JobPhase::NotStarted.can_transition_to(JobPhase::Extracting));
        assert!(JobPhase::Extracting.can_transition_to(JobPhase::Succeeded));
        assert!(JobPhase::Extracting.can_transition_to(JobPhase::Failed));
        assert!(!JobPhase::NotStarted.can_transition_to(JobPhase::Succeeded));
        assert!(!JobPhase::Succeeded.can_transition_to(JobPhase::Failed));
        assert!(!JobPhase::Failed.can_transition_to(JobPhase::Extracting));
        assert!(JobPhase::Failed.is_terminal());
        assert!(!JobPhase::Extracting.is_terminal());
    }

    #[test]
    fn test_tracker_keeps_max_and_skips_nulls() {
        let mut tracker = WatermarkTracker::new("id", CursorType::Int64);
        tracker.observe(&batch(&[json!(3), json!(null), json!(11)])).unwrap();
        tracker.observe(&batch(&[json!(7)])).unwrap();
        assert_eq!(tracker.max(), Some(&CursorValue::Int64 { value: 11 }));
    }

    #[test]
    fn test_tracker_boundary_follows_max() {
        let mut tracker = WatermarkTracker::new("id", CursorType::Int64);
        tracker.observe(&batch(&[json!(3), json!(3)])).unwrap();
        // Identical rows share a fingerprint.
        assert_eq!(tracker.boundary().len(), 1);
        tracker.observe(&batch(&[json!(5), json!(4)])).unwrap();
        let five = batch(&[json!(5)]);
        assert_eq!(
            tracker.boundary().iter().collect::<Vec<_>>(),
            vec![&row_fingerprint(&five.rows()[0])]
        );

        let resumed = WatermarkTracker::resume(
            "id",
            CursorType::Int64,
            None,
            tracker.boundary().clone(),
        );
        assert!(resumed.boundary().is_empty());
    }

    #[test]
    fn test_tracker_rejects_missing_or_mistyped_cursor() {
        let mut tracker = WatermarkTracker::new("updated_at", CursorType::Timestamp);
        let err = tracker.observe(&batch(&[json!(1)])).unwrap_err();
        assert_eq!(err.code, "CURSOR_FIELD_MISSING");

        let mut tracker = WatermarkTracker::new("id", CursorType::Int64);
        let err = tracker.observe(&batch(&[json!("abc")])).unwrap_err();
        assert_eq!(err.code, "CURSOR_TYPE_MISMATCH");
    }

    #[test]
    fn test_succeed_persists_max_cursor() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(run.phase(), JobPhase::Extracting);
        assert!(run.watermark().unwrap().last_value.is_none());

        run.observe(&batch(&[json!(5), json!(42)])).unwrap();
        let run_id = run.run_id();
        let stored = run.succeed(&RunStats::default()).unwrap();
        assert_eq!(stored.as_deref(), Some("42"));

        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.cursor_field.as_deref(), Some("id"));
        assert_eq!(cursor.cursor_value.as_deref(), Some("42"));
        let record = state.get_run(run_id).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
    }

    #[test]
    fn test_second_run_starts_from_persisted_watermark() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut first = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        first.observe(&batch(&[json!(10)])).unwrap();
        first.succeed(&RunStats::default()).unwrap();

        let second = SyncRun::begin(state, pipeline, stream, caller_plan(), CancelToken::new())
            .unwrap();
        assert_eq!(second.baseline_value(), Some("10"));
        let request = second.extract_request(Options::new(), 100);
        assert_eq!(
            request.watermark.unwrap().last_value,
            Some(CursorValue::Int64 { value: 10 })
        );
        assert!(request.adapter_state.is_none());
    }

    fn stored_at_ten(state: &Arc<dyn StateBackend>, boundary_rows: Vec<String>) {
        let (pipeline, stream) = ids();
        state
            .set_cursor(
                &pipeline,
                &stream,
                &CursorState {
                    cursor_field: Some("id".into()),
                    cursor_value: Some("10".into()),
                    updated_at: "2026-01-01T00:00:00Z".into(),
                    boundary_rows,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_no_advance_when_nothing_newer() {
        let state = backend();
        let (pipeline, stream) = ids();
        let delivered = batch(&[json!(10)]);
        stored_at_ten(&state, vec![row_fingerprint(&delivered.rows()[0])]);

        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        let fresh = run.dedupe(delivered);
        assert!(fresh.is_empty());
        run.observe(&fresh).unwrap();
        assert_eq!(run.succeed(&RunStats::default()).unwrap(), None);

        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.updated_at, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_dedupe_keeps_new_rows_at_and_above_watermark() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut old = Row::new();
        old.insert("id".into(), json!(10));
        old.insert("name".into(), json!("old"));
        stored_at_ten(&state, vec![row_fingerprint(&old)]);

        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        let mut same_value = Row::new();
        same_value.insert("id".into(), json!(10));
        same_value.insert("name".into(), json!("new"));
        let mut above = Row::new();
        above.insert("id".into(), json!(11));
        above.insert("name".into(), json!("old"));

        let fresh = run.dedupe(RowBatch::new(vec![old, same_value.clone(), above]));
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh.rows()[0], same_value);
        run.observe(&fresh).unwrap();
        assert_eq!(run.succeed(&RunStats::default()).unwrap().as_deref(), Some("11"));

        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.boundary_rows.len(), 1);
    }

    #[test]
    fn test_new_row_at_watermark_grows_boundary_without_moving_it() {
        let state = backend();
        let (pipeline, stream) = ids();
        stored_at_ten(&state, Vec::new());

        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        let rows = run.dedupe(batch(&[json!(10)]));
        assert_eq!(rows.len(), 1);
        run.observe(&rows).unwrap();
        assert_eq!(run.succeed(&RunStats::default()).unwrap(), None);

        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.cursor_value.as_deref(), Some("10"));
        assert_eq!(cursor.boundary_rows, vec![row_fingerprint(&rows.rows()[0])]);
    }

    #[test]
    fn test_cancelled_run_keeps_watermark() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        run.observe(&batch(&[json!(99)])).unwrap();
        let run_id = run.run_id();

        run.cancel(&RunStats::default()).unwrap();
        assert!(state.get_cursor(&pipeline, &stream).unwrap().is_none());
        assert_eq!(
            state.get_run(run_id).unwrap().unwrap().status,
            RunStatus::Cancelled
        );
    }

    #[test]
    fn test_cancel_after_commit_still_advances() {
        let state = backend();
        let (pipeline, stream) = ids();
        let cancel = CancelToken::new();
        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            cancel.clone(),
        )
        .unwrap();
        run.observe(&batch(&[json!(99)])).unwrap();
        let run_id = run.run_id();

        cancel.cancel();
        let stored = run.succeed(&RunStats::default()).unwrap();
        assert_eq!(stored.as_deref(), Some("99"));
        assert_eq!(
            state.get_run(run_id).unwrap().unwrap().status,
            RunStatus::Completed
        );
    }

    #[test]
    fn test_failed_run_records_message() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        run.observe(&batch(&[json!(1)])).unwrap();
        let run_id = run.run_id();
        let error = PipelineError::Load(ConnectorError::io("DISK_FULL", "no space left"));
        run.fail(&error, &RunStats::default()).unwrap();

        assert!(state.get_cursor(&pipeline, &stream).unwrap().is_none());
        let record = state.get_run(run_id).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.stats.error_message.unwrap().contains("DISK_FULL"));
    }

    #[test]
    fn test_concurrent_advance_is_a_conflict() {
        let state = backend();
        let (pipeline, stream) = ids();
        let mut run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            caller_plan(),
            CancelToken::new(),
        )
        .unwrap();
        run.observe(&batch(&[json!(20)])).unwrap();

        state
            .set_cursor(
                &pipeline,
                &stream,
                &CursorState {
                    cursor_field: Some("id".into()),
                    cursor_value: Some("30".into()),
                    updated_at: chrono::Utc::now().to_rfc3339(),
                    boundary_rows: Vec::new(),
                },
            )
            .unwrap();

        let err = run.succeed(&RunStats::default()).unwrap_err();
        assert!(matches!(err, PipelineError::WatermarkConflict { .. }));
        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.cursor_value.as_deref(), Some("30"));
    }

    #[test]
    fn test_changed_cursor_field_restarts_from_beginning() {
        let state = backend();
        let (pipeline, stream) = ids();
        state
            .set_cursor(
                &pipeline,
                &stream,
                &CursorState {
                    cursor_field: Some("updated_at".into()),
                    cursor_value: Some("2026-01-01T00:00:00Z".into()),
                    updated_at: chrono::Utc::now().to_rfc3339(),
                    boundary_rows: Vec::new(),
                },
            )
            .unwrap();

        let run = SyncRun::begin(state, pipeline, stream, caller_plan(), CancelToken::new())
            .unwrap();
        assert!(run.watermark().unwrap().last_value.is_none());
    }

    #[test]
    fn test_unparseable_stored_watermark_is_config_error() {
        let state = backend();
        let (pipeline, stream) = ids();
        state
            .set_cursor(
                &pipeline,
                &stream,
                &CursorState {
                    cursor_field: Some("id".into()),
                    cursor_value: Some("not-a-number".into()),
                    updated_at: chrono::Utc::now().to_rfc3339(),
                    boundary_rows: Vec::new(),
                },
            )
            .unwrap();

        let err = SyncRun::begin(state, pipeline, stream, caller_plan(), CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_adapter_state_commit_durable_on_success() {
        let state = backend();
        let (pipeline, stream) = ids();
        let plan = plan_sync(
            "kafka",
            Incrementality::AdapterManaged,
            &SyncRequest::incremental(None, CursorType::Utf8),
        )
        .unwrap();
        let run = SyncRun::begin(
            state.clone(),
            pipeline.clone(),
            stream.clone(),
            plan,
            CancelToken::new(),
        )
        .unwrap();
        let request = run.extract_request(Options::new(), 10);
        assert!(request.watermark.is_none());
        let handle = request.adapter_state.unwrap();
        assert_eq!(handle.load(), None);
        handle.commit("offset:120").unwrap();
        assert_eq!(handle.pending().as_deref(), Some("offset:120"));

        assert!(state.get_cursor(&pipeline, &stream).unwrap().is_none());
        run.succeed(&RunStats::default()).unwrap();
        let cursor = state.get_cursor(&pipeline, &stream).unwrap().unwrap();
        assert_eq!(cursor.cursor_value.as_deref(), Some("offset:120"));
        assert!(cursor.cursor_field.is_none());
    }

    #[test]
    fn test_adapter_state_commit_refused_after_cancel() {
        let cancel = CancelToken::new();
        let handle = AdapterState::new(
            PipelineId::new("p"),
            StreamName::new("s"),
            Some("offset:5".into()),
            cancel.clone(),
        );
        assert_eq!(handle.load(), Some("offset:5"));
        cancel.cancel();
        let err = handle.commit("offset:9").unwrap_err();
        assert_eq!(err.code, "JOB_CANCELLED");
        assert!(handle.pending().is_none());
    }
}
