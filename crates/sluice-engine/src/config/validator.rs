//! Semantic validation for parsed job configuration values.

use anyhow::{bail, Result};
use sluice_types::scheme::parse_scheme;
use sluice_types::wire::SyncMode;

use crate::config::types::{JobConfig, JobWriteMode};

/// Validate a parsed job configuration.
///
/// Checks only what can be decided from the file itself; whether the
/// schemes are registered is answered by resolution.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.job.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }

    if parse_scheme(&config.source.uri).is_err() {
        errors.push(format!(
            "Source uri '{}' has no scheme, expected <scheme>://...",
            config.source.uri
        ));
    }
    if config.source.table.trim().is_empty() {
        errors.push("Source table must not be empty".to_string());
    }

    if parse_scheme(&config.destination.uri).is_err() {
        errors.push(format!(
            "Destination uri '{}' has no scheme, expected <scheme>://...",
            config.destination.uri
        ));
    }
    if config
        .destination
        .table
        .as_deref()
        .is_some_and(|t| t.trim().is_empty())
    {
        errors.push("Destination table must not be empty when set".to_string());
    }

    match config.destination.write_mode {
        JobWriteMode::Upsert if config.destination.primary_key.is_empty() => {
            errors.push(
                "Destination write_mode 'upsert' requires at least one primary_key field"
                    .to_string(),
            );
        }
        JobWriteMode::Append | JobWriteMode::Replace if !config.destination.primary_key.is_empty() => {
            errors.push(format!(
                "primary_key is only used with write_mode 'upsert', not '{}'",
                config.write_mode().as_str()
            ));
        }
        _ => {}
    }
    if config
        .destination
        .primary_key
        .iter()
        .any(|k| k.trim().is_empty())
    {
        errors.push("primary_key entries must not be empty".to_string());
    }

    if config.sync.mode == SyncMode::FullRefresh && config.sync.cursor_field.is_some() {
        errors.push("cursor_field is only used with sync mode 'incremental'".to_string());
    }

    if config.sync.mode == SyncMode::Incremental
        && config.destination.write_mode == JobWriteMode::Replace
    {
        errors.push(
            "sync mode 'incremental' cannot use write_mode 'replace'; earlier rows would be dropped"
                .to_string(),
        );
    }

    if config.sync.batch_size == 0 {
        errors.push("batch_size must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "))
    }
}
