use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use sluice_connectors::builtin;
use sluice_engine::config::{parser, validator};
use sluice_engine::orchestrator::open_state_backend;
use sluice_engine::{run_job, CancelToken, JobResult, JobSpec, PipelineError};
use sluice_state::StateBackend;

/// Execute the `run` command: parse, validate, and run a job file.
pub async fn execute(job_path: &Path) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    validator::validate_job(&config)?;

    tracing::info!(
        job = config.job,
        source = config.source.uri,
        destination = config.destination.uri,
        mode = ?config.sync.mode,
        "Job validated"
    );

    let state = open_state_backend(&config.state)?;
    let spec = config.to_job_spec();
    let result = run_with_interrupt(spec.clone(), state).await?;
    print_summary(&spec, &result);
    Ok(())
}

/// Run a job on a blocking worker. Ctrl-C cancels it at the next batch
/// boundary, leaving the stored watermark untouched.
pub(crate) async fn run_with_interrupt(
    spec: JobSpec,
    state: Arc<dyn StateBackend>,
) -> Result<JobResult> {
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let mut worker =
        tokio::task::spawn_blocking(move || run_job(builtin(), state, &spec, &worker_cancel));

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, cancelling after the current batch");
            cancel.cancel();
            worker.await
        }
    };

    match joined.context("Job worker panicked")? {
        Ok(result) => Ok(result),
        Err(err @ PipelineError::IncrementalityUnsupported { .. }) => Err(anyhow::Error::new(err)
            .context("Incremental sync is not available for this source")),
        Err(err) => {
            tracing::error!(stage = err.stage(), retryable = err.is_retryable(), error = %err, "Job failed");
            Err(err.into())
        }
    }
}

pub(crate) fn print_summary(spec: &JobSpec, result: &JobResult) {
    println!("Job '{}' completed successfully.", spec.pipeline.as_str());
    println!(
        "  Adapters:        {} -> {}",
        result.source_adapter, result.destination_adapter
    );
    println!("  Sync mode:       {:?}", result.plan.mode());
    if result.plan.fell_back {
        println!("  Fallback:        full refresh (source has no incremental support)");
    }
    println!("  Records read:    {}", result.counts.records_read);
    println!("  Records written: {}", result.counts.records_written);
    if let Some(watermark) = &result.watermark {
        println!("  Watermark:       {watermark}");
    }
    println!("  Duration:        {:.2}s", result.duration_secs);

    let json = serde_json::json!({
        "job": spec.pipeline.as_str(),
        "records_read": result.counts.records_read,
        "records_written": result.counts.records_written,
        "watermark": result.watermark,
        "duration_secs": result.duration_secs,
    });
    println!("@@SLUICE_JSON@@{json}");
}
