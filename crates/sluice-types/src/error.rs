//! Structured error model for adapter operations.
//!
//! Adapters own their internal failures (network, auth, driver). The core only
//! needs a category and a stable code to classify and report them, so every
//! adapter returns [`ConnectorError`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an adapter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid adapter configuration or location.
    Config,
    /// Authentication failure.
    Auth,
    /// Rate limit exceeded (retryable).
    RateLimit,
    /// Transient network error (retryable).
    TransientNetwork,
    /// Transient database error (retryable).
    TransientDb,
    /// Invalid or corrupt data.
    Data,
    /// Local I/O failure.
    Io,
    /// Internal adapter error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Data => "data",
            Self::Io => "io",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from an adapter operation.
///
/// Construct via category-specific factory methods (e.g. [`ConnectorError::config`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, code, message)
    }

    /// Authentication error (not retryable).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, false, code, message)
    }

    /// Rate limit error (retryable).
    #[must_use]
    pub fn rate_limit(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::RateLimit, true, code, message)
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, true, code, message)
    }

    /// Transient database error (retryable).
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, true, code, message)
    }

    /// Data validation error (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, code, message)
    }

    /// Local I/O error (not retryable).
    #[must_use]
    pub fn io(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Io, false, code, message)
    }

    /// Internal adapter error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
