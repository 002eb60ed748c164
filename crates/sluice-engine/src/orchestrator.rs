//! Reference single-job driver: resolve, extract, load, finalize.
//!
//! Blocking. Callers that run jobs from async code move [`run_job`] onto a
//! blocking worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sluice_state::{SqliteStateBackend, StateBackend};
use sluice_types::batch::Options;
use sluice_types::state::{PipelineId, RunStats, StreamName};
use sluice_types::wire::{SyncMode, WriteMode};

use crate::config::types::{StateBackendKind, StateConfig};
use crate::contract::{DestinationHandle, Extractable, Loadable, RunParameters, DEFAULT_BATCH_SIZE};
use crate::error::PipelineError;
use crate::incremental::{plan_sync, CancelToken, SyncPlan, SyncRequest, SyncRun};
use crate::registry::ConnectorRegistry;
use crate::resolve::{check, resolve};
use crate::result::{CheckResult, JobCounts, JobResult};

/// Everything one job needs, independent of how it was configured.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub pipeline: PipelineId,
    pub source_uri: String,
    pub source_table: String,
    pub dest_uri: String,
    pub dest_table: String,
    pub source_options: Options,
    pub dest_options: Options,
    pub sync: SyncRequest,
    pub write_mode: WriteMode,
    pub batch_size: usize,
}

impl JobSpec {
    /// Full-refresh append job; destination table defaults to the source table.
    #[must_use]
    pub fn new(
        pipeline: impl Into<PipelineId>,
        source_uri: impl Into<String>,
        source_table: impl Into<String>,
        dest_uri: impl Into<String>,
    ) -> Self {
        let source_table = source_table.into();
        Self {
            pipeline: pipeline.into(),
            source_uri: source_uri.into(),
            dest_table: source_table.clone(),
            source_table,
            dest_uri: dest_uri.into(),
            source_options: Options::new(),
            dest_options: Options::new(),
            sync: SyncRequest::full_refresh(),
            write_mode: WriteMode::Append,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    fn stream(&self) -> StreamName {
        StreamName::new(self.source_table.clone())
    }
}

/// An incremental run extracts only rows past the watermark, so replacing the
/// target with them would drop everything loaded earlier.
fn ensure_write_mode_fits(plan: &SyncPlan, write_mode: &WriteMode) -> Result<(), PipelineError> {
    if plan.mode() == SyncMode::Incremental && *write_mode == WriteMode::Replace {
        return Err(PipelineError::Config(
            "incremental sync cannot use write mode 'replace'; use 'append' or 'upsert'"
                .to_string(),
        ));
    }
    Ok(())
}

/// Run one job to completion.
///
/// The watermark is persisted only after the destination's post-load step
/// succeeds. Cancellation is honoured between batches and before
/// finalization; a cancelled job leaves the watermark where it was.
///
/// # Errors
///
/// Returns [`PipelineError`] naming the stage that failed.
pub fn run_job(
    registry: &ConnectorRegistry,
    state: Arc<dyn StateBackend>,
    spec: &JobSpec,
    cancel: &CancelToken,
) -> Result<JobResult, PipelineError> {
    let start = Instant::now();
    let resolved = resolve(registry, &spec.source_uri, &spec.dest_uri)?;
    let source = resolved.source;
    let mut destination = resolved.destination;

    let plan = plan_sync(
        source.adapter_id(),
        source.incrementality(&spec.source_uri),
        &spec.sync,
    )?;
    ensure_write_mode_fits(&plan, &spec.write_mode)?;
    let params = destination
        .run_parameters(&spec.dest_uri, &spec.dest_table, &spec.dest_options)
        .map_err(PipelineError::Load)?
        .with_write_mode(spec.write_mode.clone());

    let mut run = SyncRun::begin(
        state,
        spec.pipeline.clone(),
        spec.stream(),
        plan.clone(),
        cancel.clone(),
    )?;

    let mut counts = JobCounts::default();
    let outcome = transfer(
        source.as_ref(),
        destination.as_mut(),
        spec,
        &params,
        &mut run,
        cancel,
        &mut counts,
    );
    let stats = RunStats {
        records_read: counts.records_read,
        records_written: counts.records_written,
        error_message: None,
    };

    match outcome {
        Ok(()) => {
            let watermark = run.succeed(&stats)?;
            let duration_secs = start.elapsed().as_secs_f64();
            tracing::info!(
                pipeline = spec.pipeline.as_str(),
                source = source.adapter_id(),
                destination = destination.adapter_id(),
                records_read = counts.records_read,
                records_written = counts.records_written,
                duration_secs,
                "Job completed"
            );
            Ok(JobResult {
                counts,
                plan,
                watermark,
                source_adapter: source.adapter_id(),
                destination_adapter: destination.adapter_id(),
                duration_secs,
            })
        }
        Err(PipelineError::Cancelled) => {
            run.cancel(&stats)?;
            Err(PipelineError::Cancelled)
        }
        Err(err) => {
            if let Err(state_err) = run.fail(&err, &stats) {
                tracing::error!(
                    pipeline = spec.pipeline.as_str(),
                    error = %state_err,
                    "Failed to record failed run"
                );
            }
            Err(err)
        }
    }
}

fn transfer(
    source: &dyn Extractable,
    destination: &mut dyn Loadable,
    spec: &JobSpec,
    params: &RunParameters,
    run: &mut SyncRun,
    cancel: &CancelToken,
    counts: &mut JobCounts,
) -> Result<(), PipelineError> {
    let request = run.extract_request(spec.source_options.clone(), spec.batch_size.max(1));
    let batches = source
        .produce(&spec.source_uri, &spec.source_table, request)
        .map_err(PipelineError::Extract)?;
    let mut handle: Box<dyn DestinationHandle> = destination
        .bind(&spec.dest_uri, params, &spec.dest_options)
        .map_err(PipelineError::Load)?;

    for batch in batches {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let batch = batch.map_err(PipelineError::Extract)?;
        counts.records_read += batch.len() as u64;
        let batch = run.dedupe(batch);
        if batch.is_empty() {
            continue;
        }
        run.observe(&batch)?;
        handle.write(&batch).map_err(PipelineError::Load)?;
        tracing::debug!(
            pipeline = spec.pipeline.as_str(),
            rows = batch.len(),
            records_read = counts.records_read,
            "Batch staged"
        );
    }

    let summary = handle.finish().map_err(PipelineError::Load)?;
    counts.records_written = summary.records_written;
    drop(handle);

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    destination.post_load().map_err(PipelineError::PostLoad)?;
    Ok(())
}

/// Resolve and plan a job without moving data or touching state.
///
/// # Errors
///
/// Returns [`PipelineError`] for resolution, planning or naming failures.
pub fn check_job(registry: &ConnectorRegistry, spec: &JobSpec) -> Result<CheckResult, PipelineError> {
    let resolved = check(registry, &spec.source_uri, &spec.dest_uri)?.instantiate();
    let incrementality = resolved.source.incrementality(&spec.source_uri);
    let plan = plan_sync(resolved.source.adapter_id(), incrementality, &spec.sync)?;
    ensure_write_mode_fits(&plan, &spec.write_mode)?;
    let run_parameters = resolved
        .destination
        .run_parameters(&spec.dest_uri, &spec.dest_table, &spec.dest_options)
        .map_err(PipelineError::Load)?
        .with_write_mode(spec.write_mode.clone());

    Ok(CheckResult {
        source_kind: resolved.source_kind,
        source_adapter: resolved.source.adapter_id(),
        destination_adapter: resolved.destination.adapter_id(),
        incrementality,
        plan,
        run_parameters,
    })
}

/// Open the state backend named by a job's `state` section.
///
/// Without an explicit connection the database lives at `~/.sluice/state.db`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_state_backend(config: &StateConfig) -> anyhow::Result<Arc<dyn StateBackend>> {
    match config.backend {
        StateBackendKind::Sqlite => {
            let path = config
                .connection
                .as_deref()
                .map_or_else(default_state_path, PathBuf::from);
            let backend = SqliteStateBackend::open(&path)
                .with_context(|| format!("Failed to open state DB: {}", path.display()))?;
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    Path::new(&home).join(".sluice").join("state.db")
}
