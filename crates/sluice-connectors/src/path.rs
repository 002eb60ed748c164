//! Local file paths carried in Location URIs.

use std::path::PathBuf;

use sluice_types::error::ConnectorError;
use sluice_types::scheme::Location;

/// Path after `scheme://`, without any query string.
///
/// `csv:///data/a.csv` yields `/data/a.csv`; `csv://a.csv` yields `a.csv`.
pub(crate) fn file_path(uri: &str) -> Result<PathBuf, ConnectorError> {
    let remainder = remainder_without_query(uri)?;
    if remainder.is_empty() {
        return Err(missing_path(uri));
    }
    Ok(PathBuf::from(remainder))
}

/// Database path in SQLAlchemy form: `sqlite:///rel.db` is relative,
/// `sqlite:////abs/x.db` is absolute.
pub(crate) fn sqlalchemy_path(uri: &str) -> Result<PathBuf, ConnectorError> {
    let remainder = remainder_without_query(uri)?;
    let path = remainder.strip_prefix('/').unwrap_or(remainder);
    if path.is_empty() {
        return Err(missing_path(uri));
    }
    Ok(PathBuf::from(path))
}

fn remainder_without_query(uri: &str) -> Result<&str, ConnectorError> {
    let location =
        Location::parse(uri).map_err(|e| ConnectorError::config("INVALID_URI", e.to_string()))?;
    Ok(location
        .remainder
        .split_once('?')
        .map_or(location.remainder, |(path, _)| path))
}

fn missing_path(uri: &str) -> ConnectorError {
    ConnectorError::config("MISSING_PATH", format!("location '{uri}' does not name a file"))
}
