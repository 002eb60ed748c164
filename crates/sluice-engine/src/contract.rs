//! Capability contracts every adapter satisfies.
//!
//! An adapter is a concrete type implementing [`Extractable`] (a source) or
//! [`Loadable`] (a destination). Constructors take no arguments; everything
//! job-specific arrives through these operations.

use std::fmt;

use sluice_types::batch::{Options, RowBatch};
use sluice_types::cursor::Watermark;
use sluice_types::error::ConnectorError;
use sluice_types::wire::{Incrementality, WriteMode};

use crate::incremental::AdapterState;

/// Rows per batch when the job does not say otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Lazy sequence of row batches produced by a source.
pub type BatchIter = Box<dyn Iterator<Item = Result<RowBatch, ConnectorError>> + Send>;

/// Per-job extraction parameters.
///
/// All incremental state travels here; adapters never keep it between jobs.
pub struct ExtractRequest {
    /// Adapter-specific options, verbatim from the job.
    pub options: Options,
    /// Caller-managed watermark. Set only for incremental runs of
    /// [`Incrementality::CallerManaged`] sources.
    pub watermark: Option<Watermark>,
    /// Handle for sources that track their own cursor.
    pub adapter_state: Option<AdapterState>,
    pub batch_size: usize,
}

impl ExtractRequest {
    /// Full-refresh request with default batch size.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            options,
            watermark: None,
            adapter_state: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl fmt::Debug for ExtractRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractRequest")
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("watermark", &self.watermark)
            .field("adapter_state", &self.adapter_state.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Source capability.
pub trait Extractable: Send {
    /// Stable identifier used in logs and errors, e.g. `"csv"` or `"sql:postgres"`.
    fn adapter_id(&self) -> &'static str;

    /// Who tracks the watermark for `uri`.
    ///
    /// Adapters covering several engines under one family branch on the
    /// concrete scheme in `uri`.
    fn incrementality(&self, uri: &str) -> Incrementality;

    /// Whether the adapter advances its own watermark.
    fn owns_incrementality(&self, uri: &str) -> bool {
        self.incrementality(uri) == Incrementality::AdapterManaged
    }

    /// Start pulling rows from `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if extraction cannot start. Errors met
    /// while iterating are yielded by the iterator.
    fn produce(
        &self,
        uri: &str,
        table: &str,
        request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError>;
}

/// Where and how a destination writes one job's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    /// Schema or dataset. `None` for destinations with a flat namespace.
    pub dataset: Option<String>,
    pub table: String,
    pub write_mode: WriteMode,
    /// Destination-specific derived settings.
    pub extra: Options,
}

impl RunParameters {
    /// Split `schema.table` on the first dot.
    ///
    /// # Errors
    ///
    /// Returns a config error for an empty table name, or when
    /// `require_dataset` is set and the name has no dataset part.
    pub fn from_table(table: &str, require_dataset: bool) -> Result<Self, ConnectorError> {
        let table = table.trim();
        let (dataset, name) = match table.split_once('.') {
            Some((dataset, name)) => (Some(dataset.to_string()), name),
            None => (None, table),
        };
        if name.is_empty() || dataset.as_deref() == Some("") {
            return Err(ConnectorError::config(
                "INVALID_TABLE",
                format!("table name '{table}' is empty or malformed"),
            ));
        }
        if require_dataset && dataset.is_none() {
            return Err(ConnectorError::config(
                "DATASET_REQUIRED",
                format!("table name must be in the format <schema>.<table>, got '{table}'"),
            ));
        }
        Ok(Self {
            dataset,
            table: name.to_string(),
            write_mode: WriteMode::default(),
            extra: Options::new(),
        })
    }

    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// `dataset.table`, or just `table`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.dataset {
            Some(dataset) => format!("{dataset}.{}", self.table),
            None => self.table.clone(),
        }
    }
}

/// Rows durably staged by a [`DestinationHandle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub records_written: u64,
}

/// A destination bound to one job's target.
pub trait DestinationHandle: Send {
    /// Stage one batch.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the batch cannot be staged.
    fn write(&mut self, batch: &RowBatch) -> Result<(), ConnectorError>;

    /// Flush everything written so far to the staging area.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if staged rows cannot be made durable.
    fn finish(&mut self) -> Result<WriteSummary, ConnectorError>;
}

/// Destination capability.
pub trait Loadable: Send {
    /// Stable identifier used in logs and errors.
    fn adapter_id(&self) -> &'static str;

    /// Derive target naming and settings for `table`.
    ///
    /// # Errors
    ///
    /// Returns a config [`ConnectorError`] when `table` does not fit the
    /// destination's naming rules.
    fn run_parameters(
        &self,
        uri: &str,
        table: &str,
        options: &Options,
    ) -> Result<RunParameters, ConnectorError>;

    /// Open a handle that stages rows for this job.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if the destination is unreachable or
    /// rejects the write mode.
    fn bind(
        &mut self,
        uri: &str,
        params: &RunParameters,
        options: &Options,
    ) -> Result<Box<dyn DestinationHandle>, ConnectorError>;

    /// Finalize staged rows into the target. Called once, after a
    /// successful load.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if finalization fails. Staged rows are
    /// left in place.
    fn post_load(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parameters_split_on_first_dot() {
        let params = RunParameters::from_table("raw.events.v2", false).unwrap();
        assert_eq!(params.dataset.as_deref(), Some("raw"));
        assert_eq!(params.table, "events.v2");
        assert_eq!(params.qualified_name(), "raw.events.v2");
    }

    #[test]
    fn test_run_parameters_bare_table() {
        let params = RunParameters::from_table("events", false).unwrap();
        assert!(params.dataset.is_none());
        assert_eq!(params.qualified_name(), "events");
        assert_eq!(params.write_mode, WriteMode::Append);
    }

    #[test]
    fn test_run_parameters_dataset_required() {
        let err = RunParameters::from_table("events", true).unwrap_err();
        assert_eq!(err.code, "DATASET_REQUIRED");
    }

    #[test]
    fn test_run_parameters_rejects_empty_parts() {
        assert!(RunParameters::from_table("", false).is_err());
        assert!(RunParameters::from_table(".events", false).is_err());
        assert!(RunParameters::from_table("raw.", false).is_err());
    }

    #[test]
    fn test_with_write_mode() {
        let params = RunParameters::from_table("raw.events", true)
            .unwrap()
            .with_write_mode(WriteMode::Replace);
        assert_eq!(params.write_mode, WriteMode::Replace);
    }

    #[test]
    fn test_contracts_are_object_safe() {
        fn _source(_: &dyn Extractable) {}
        fn _destination(_: &dyn Loadable) {}
        fn _handle(_: &dyn DestinationHandle) {}
    }
}
