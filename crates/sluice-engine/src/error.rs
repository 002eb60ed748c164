//! Pipeline error model.

use sluice_state::StateError;
use sluice_types::error::ConnectorError;

use crate::resolve::ResolveError;

/// Categorized job failure.
///
/// Resolution and configuration errors are raised before any I/O begins.
/// `Extract`, `Load` and `PostLoad` keep the adapter's typed
/// [`ConnectorError`] so retry decisions stay with its metadata.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A location could not be matched to an adapter.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The job configuration is inconsistent with the selected adapters.
    #[error("invalid job configuration: {0}")]
    Config(String),

    /// Incremental sync was requested from a full-refresh-only source.
    #[error(
        "source adapter '{adapter}' only supports full refresh but incremental sync was requested \
         (set full_refresh_fallback to fall back)"
    )]
    IncrementalityUnsupported { adapter: String },

    #[error("extraction failed: {0}")]
    Extract(#[source] ConnectorError),

    #[error("load failed: {0}")]
    Load(#[source] ConnectorError),

    /// Rows are staged in the destination but were not finalized.
    #[error("post-load finalize failed, data is staged but not committed: {0}")]
    PostLoad(#[source] ConnectorError),

    #[error("state backend error: {0}")]
    State(#[from] StateError),

    /// Another run advanced the watermark between this run's start and commit.
    #[error(
        "watermark for {pipeline}/{stream} moved while the run was in flight (expected {expected:?})"
    )]
    WatermarkConflict {
        pipeline: String,
        stream: String,
        expected: Option<String>,
    },

    #[error("job cancelled")]
    Cancelled,

    /// Opaque host-side failure.
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Name of the stage that failed, for logs and run history.
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Config(_) | Self::IncrementalityUnsupported { .. } => "plan",
            Self::Extract(_) => "extract",
            Self::Load(_) => "load",
            Self::PostLoad(_) => "post_load",
            Self::State(_) | Self::WatermarkConflict { .. } => "state",
            Self::Cancelled => "cancel",
            Self::Infrastructure(_) => "internal",
        }
    }

    /// Whether the caller can recover without changing the job.
    ///
    /// Only an incrementality mismatch qualifies: rerunning with
    /// full-refresh fallback enabled succeeds.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IncrementalityUnsupported { .. })
    }

    /// Returns `true` if the adapter marked the underlying error as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.as_connector_error().is_some_and(|e| e.retryable)
    }

    /// Returns the typed adapter error for `Extract`, `Load` and `PostLoad`.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Extract(e) | Self::Load(e) | Self::PostLoad(e) => Some(e),
            _ => None,
        }
    }
}
