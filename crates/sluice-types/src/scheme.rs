//! Location URI scheme extraction.
//!
//! A Location URI is `scheme://remainder`. The scheme selects the connector;
//! the remainder is opaque and only meaningful to the matched adapter.

use std::fmt;

use serde::{Deserialize, Serialize};

const SCHEME_SEPARATOR: &str = "://";

/// The location string carries no extractable scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not parse scheme from location '{location}'")]
pub struct MalformedLocation {
    /// The offending input, verbatim.
    pub location: String,
}

/// Leading token of a Location URI.
///
/// Case is preserved exactly as written. Registry lookups go through
/// [`SchemeToken::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemeToken(String);

impl SchemeToken {
    /// Wrap a raw scheme string.
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self(scheme.into())
    }

    /// Borrow the scheme as written in the location.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase lookup key.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for SchemeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the scheme from a Location URI.
///
/// Strict URI parsing is tried first. Inputs a strict parser rejects (bad
/// ports, characters outside the scheme grammar, unescaped credentials) fall
/// back to splitting on `"://"`.
///
/// # Errors
///
/// Returns [`MalformedLocation`] when neither path yields a non-empty scheme.
pub fn parse_scheme(uri: &str) -> Result<SchemeToken, MalformedLocation> {
    if let Some(scheme) = strict_scheme(uri) {
        return Ok(SchemeToken(scheme.to_string()));
    }

    match uri.split_once(SCHEME_SEPARATOR) {
        Some((head, _)) if !head.is_empty() => Ok(SchemeToken(head.to_string())),
        _ => Err(MalformedLocation {
            location: uri.to_string(),
        }),
    }
}

/// Scheme as accepted by the `url` crate, sliced from the original input.
///
/// `url` lowercases the scheme and strips leading control characters and
/// spaces, so the original-case slice is recovered from the trimmed input.
fn strict_scheme(uri: &str) -> Option<&str> {
    let parsed = url::Url::parse(uri).ok()?;
    let scheme = parsed.scheme();
    if scheme.is_empty() {
        return None;
    }
    let trimmed = uri.trim_start_matches(|c: char| c == ' ' || c.is_ascii_control());
    trimmed
        .get(..scheme.len())
        .filter(|original| original.eq_ignore_ascii_case(scheme))
}

/// A parsed Location URI: scheme plus the opaque remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location<'a> {
    pub scheme: SchemeToken,
    /// Everything after `://` (or after `:` for colon-only forms). Empty for
    /// the degenerate `scheme://` form.
    pub remainder: &'a str,
}

impl<'a> Location<'a> {
    /// Parse a Location URI.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedLocation`] when no scheme can be extracted.
    pub fn parse(uri: &'a str) -> Result<Self, MalformedLocation> {
        let scheme = parse_scheme(uri)?;
        let remainder = uri
            .split_once(SCHEME_SEPARATOR)
            .or_else(|| uri.split_once(':'))
            .map_or("", |(_, rest)| rest);
        Ok(Self { scheme, remainder })
    }
}
