//! Resolution of a (source, destination) location pair to adapters.
//!
//! [`check`] answers "do both schemes exist" without constructing anything,
//! so an unknown system is reported as a configuration error before any
//! adapter can fail on credentials. [`ResolvedSchemes::instantiate`] then
//! builds fresh adapter instances.

use sluice_types::scheme::{parse_scheme, SchemeToken};
use sluice_types::wire::Side;

use crate::contract::{Extractable, Loadable};
use crate::registry::{ConnectorRegistry, DestinationCtor, SourceCtor, SourceScheme};

/// Resolution failure, always attributed to one side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{side} location '{location}' has no scheme, expected <scheme>://...")]
    MalformedLocation { side: Side, location: String },

    #[error("unsupported {side} scheme '{scheme}': no {side} adapter is registered under that name")]
    UnsupportedScheme { side: Side, scheme: String },
}

impl ResolveError {
    #[must_use]
    pub fn side(&self) -> Side {
        match self {
            Self::MalformedLocation { side, .. } | Self::UnsupportedScheme { side, .. } => *side,
        }
    }
}

/// Both schemes exist; nothing has been constructed yet.
#[derive(Debug, Clone)]
pub struct ResolvedSchemes {
    pub source_scheme: SchemeToken,
    pub destination_scheme: SchemeToken,
    pub source_kind: SourceScheme,
    source_ctor: SourceCtor,
    destination_ctor: DestinationCtor,
}

impl ResolvedSchemes {
    /// Construct a fresh adapter pair. Every call returns new instances.
    #[must_use]
    pub fn instantiate(&self) -> ResolvedConnectors {
        ResolvedConnectors {
            source: (self.source_ctor)(),
            destination: (self.destination_ctor)(),
            source_scheme: self.source_scheme.clone(),
            destination_scheme: self.destination_scheme.clone(),
            source_kind: self.source_kind.clone(),
        }
    }
}

/// One job's adapters. Owned exclusively by that job.
pub struct ResolvedConnectors {
    pub source: Box<dyn Extractable>,
    pub destination: Box<dyn Loadable>,
    pub source_scheme: SchemeToken,
    pub destination_scheme: SchemeToken,
    pub source_kind: SourceScheme,
}

fn parse_side(side: Side, uri: &str) -> Result<SchemeToken, ResolveError> {
    parse_scheme(uri).map_err(|e| ResolveError::MalformedLocation {
        side,
        location: e.location,
    })
}

/// Check that both locations name registered adapters.
///
/// Both schemes are parsed before any lookup; the source side is reported
/// first when both are at fault.
///
/// # Errors
///
/// Returns [`ResolveError`] naming the failing side.
pub fn check(
    registry: &ConnectorRegistry,
    source_uri: &str,
    destination_uri: &str,
) -> Result<ResolvedSchemes, ResolveError> {
    let source_scheme = parse_side(Side::Source, source_uri)?;
    let destination_scheme = parse_side(Side::Destination, destination_uri)?;

    let (source_kind, source_ctor) =
        registry
            .resolve_source_adapter(&source_scheme)
            .ok_or_else(|| ResolveError::UnsupportedScheme {
                side: Side::Source,
                scheme: source_scheme.as_str().to_string(),
            })?;

    let destination_ctor = registry
        .resolve_destination_adapter(&destination_scheme)
        .ok_or_else(|| ResolveError::UnsupportedScheme {
            side: Side::Destination,
            scheme: destination_scheme.as_str().to_string(),
        })?;

    Ok(ResolvedSchemes {
        source_scheme,
        destination_scheme,
        source_kind,
        source_ctor,
        destination_ctor,
    })
}

/// Resolve both locations and construct a fresh adapter pair.
///
/// # Errors
///
/// Returns [`ResolveError`] naming the failing side.
pub fn resolve(
    registry: &ConnectorRegistry,
    source_uri: &str,
    destination_uri: &str,
) -> Result<ResolvedConnectors, ResolveError> {
    let resolved = check(registry, source_uri, destination_uri)?.instantiate();
    tracing::debug!(
        source_scheme = resolved.source_scheme.as_str(),
        source_kind = %resolved.source_kind,
        source_adapter = resolved.source.adapter_id(),
        destination_scheme = resolved.destination_scheme.as_str(),
        destination_adapter = resolved.destination.adapter_id(),
        "Resolved connectors"
    );
    Ok(resolved)
}
