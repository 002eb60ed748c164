use std::path::Path;

use anyhow::{Context, Result};

use sluice_connectors::builtin;
use sluice_engine::check_job;
use sluice_engine::config::{parser, validator};
use sluice_engine::incremental::Tracking;

/// Execute the `check` command: validate the job file and resolve both
/// adapters without touching either system or the state store.
pub fn execute(job_path: &Path) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    validator::validate_job(&config)?;
    println!("Job structure:     OK");

    let spec = config.to_job_spec();
    let result = check_job(builtin(), &spec)?;

    println!(
        "Source:            {} ({})",
        result.source_adapter, result.source_kind
    );
    println!("Destination:       {}", result.destination_adapter);
    println!("Incrementality:    {}", result.incrementality);
    match &result.plan.tracking {
        Tracking::None => println!("Sync:              full refresh"),
        Tracking::Caller {
            cursor_field,
            cursor_type,
        } => println!(
            "Sync:              incremental on {cursor_field} ({})",
            cursor_type.as_str()
        ),
        Tracking::Adapter => println!("Sync:              incremental, tracked by the source"),
    }
    if result.plan.fell_back {
        println!("  Falling back to full refresh: source has no incremental support");
    }
    println!(
        "Target:            {} ({})",
        result.run_parameters.qualified_name(),
        result.run_parameters.write_mode.as_str()
    );

    println!("\nAll checks passed.");
    Ok(())
}
