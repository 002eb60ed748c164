//! Scheme → adapter registries.
//!
//! Two independent tables, one per side, plus the SQL-family short-circuit
//! for sources. A registry is immutable once built; construct one with
//! [`RegistryBuilder`] and share it by reference.

use std::collections::BTreeMap;
use std::fmt;

use sluice_types::scheme::SchemeToken;
use sluice_types::wire::Side;

use crate::contract::{Extractable, Loadable};
use crate::sql_family::{SqlEngine, FAMILY_SCHEMES};

/// Zero-argument source constructor.
pub type SourceCtor = fn() -> Box<dyn Extractable>;

/// Zero-argument destination constructor.
pub type DestinationCtor = fn() -> Box<dyn Loadable>;

/// How a source scheme was classified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceScheme {
    /// Member of the SQL-family set; served by the generic SQL adapter.
    SqlFamily(SqlEngine),
    /// Looked up in the named source table under this key.
    Named(String),
}

impl fmt::Display for SourceScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlFamily(engine) => write!(f, "sql:{engine}"),
            Self::Named(key) => f.write_str(key),
        }
    }
}

/// Invalid registry table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{side} scheme '{scheme}' is registered more than once")]
    DuplicateScheme { side: Side, scheme: String },
    #[error("{side} scheme must not be empty")]
    EmptyScheme { side: Side },
}

/// Immutable scheme tables.
pub struct ConnectorRegistry {
    sources: BTreeMap<String, SourceCtor>,
    destinations: BTreeMap<String, DestinationCtor>,
    sql_family: Option<SourceCtor>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Classify a source scheme. SQL-family membership is checked first.
    ///
    /// Family schemes are only recognised when a family adapter is installed.
    #[must_use]
    pub fn classify_source(&self, scheme: &SchemeToken) -> Option<SourceScheme> {
        let key = scheme.normalized();
        if self.sql_family.is_some() {
            if let Some(engine) = SqlEngine::from_scheme(&key) {
                return Some(SourceScheme::SqlFamily(engine));
            }
        }
        self.sources
            .contains_key(&key)
            .then_some(SourceScheme::Named(key))
    }

    /// Constructor for a classified source scheme.
    #[must_use]
    pub fn source_constructor(&self, kind: &SourceScheme) -> Option<SourceCtor> {
        match kind {
            SourceScheme::SqlFamily(_) => self.sql_family,
            SourceScheme::Named(key) => self.sources.get(key).copied(),
        }
    }

    /// Classify and look up a source scheme in one step.
    #[must_use]
    pub fn resolve_source_adapter(
        &self,
        scheme: &SchemeToken,
    ) -> Option<(SourceScheme, SourceCtor)> {
        let kind = self.classify_source(scheme)?;
        let ctor = self.source_constructor(&kind)?;
        Some((kind, ctor))
    }

    /// Exact-match lookup in the destination table.
    #[must_use]
    pub fn resolve_destination_adapter(&self, scheme: &SchemeToken) -> Option<DestinationCtor> {
        self.destinations.get(&scheme.normalized()).copied()
    }

    #[must_use]
    pub fn supports_source(&self, scheme: &str) -> bool {
        self.classify_source(&SchemeToken::new(scheme)).is_some()
    }

    #[must_use]
    pub fn supports_destination(&self, scheme: &str) -> bool {
        self.destinations
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Named source schemes, sorted. Excludes the SQL family.
    #[must_use]
    pub fn source_schemes(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// SQL-family schemes served by the family adapter, empty if none is installed.
    #[must_use]
    pub fn sql_family_schemes(&self) -> &'static [&'static str] {
        if self.sql_family.is_some() {
            FAMILY_SCHEMES
        } else {
            &[]
        }
    }

    /// Destination schemes, sorted.
    #[must_use]
    pub fn destination_schemes(&self) -> Vec<&str> {
        self.destinations.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_schemes())
            .field("destinations", &self.destination_schemes())
            .field("sql_family", &self.sql_family.is_some())
            .finish()
    }
}

/// Collects registry entries; [`RegistryBuilder::build`] checks them.
#[derive(Default)]
pub struct RegistryBuilder {
    sources: Vec<(String, SourceCtor)>,
    destinations: Vec<(String, DestinationCtor)>,
    sql_family: Option<SourceCtor>,
}

impl RegistryBuilder {
    /// Register a named source. Keys are lowercased.
    #[must_use]
    pub fn source(mut self, scheme: &str, ctor: SourceCtor) -> Self {
        self.sources.push((scheme.to_ascii_lowercase(), ctor));
        self
    }

    /// Register a destination. Keys are lowercased.
    #[must_use]
    pub fn destination(mut self, scheme: &str, ctor: DestinationCtor) -> Self {
        self.destinations.push((scheme.to_ascii_lowercase(), ctor));
        self
    }

    /// Install the adapter serving every SQL-family scheme.
    #[must_use]
    pub fn sql_family(mut self, ctor: SourceCtor) -> Self {
        self.sql_family = Some(ctor);
        self
    }

    /// Freeze the tables.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on an empty or duplicate key within one side.
    pub fn build(self) -> Result<ConnectorRegistry, RegistryError> {
        Ok(ConnectorRegistry {
            sources: into_table(Side::Source, self.sources)?,
            destinations: into_table(Side::Destination, self.destinations)?,
            sql_family: self.sql_family,
        })
    }
}

fn into_table<C>(side: Side, entries: Vec<(String, C)>) -> Result<BTreeMap<String, C>, RegistryError> {
    let mut table = BTreeMap::new();
    for (scheme, ctor) in entries {
        if scheme.trim().is_empty() {
            return Err(RegistryError::EmptyScheme { side });
        }
        if table.insert(scheme.clone(), ctor).is_some() {
            return Err(RegistryError::DuplicateScheme { side, scheme });
        }
    }
    Ok(table)
}
