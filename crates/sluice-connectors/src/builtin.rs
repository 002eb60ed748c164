//! The default scheme tables.

use std::sync::LazyLock;

use sluice_engine::registry::RegistryError;
use sluice_engine::{ConnectorRegistry, Extractable, Loadable};

use crate::csv_file::{CsvDestination, CsvSource};
use crate::external;
use crate::sql::SqlSource;
use crate::sqlite::SqliteDestination;

fn sql_source() -> Box<dyn Extractable> {
    Box::new(SqlSource::default())
}

fn csv_source() -> Box<dyn Extractable> {
    Box::new(CsvSource::default())
}

fn csv_destination() -> Box<dyn Loadable> {
    Box::new(CsvDestination::default())
}

fn sqlite_destination() -> Box<dyn Loadable> {
    Box::new(SqliteDestination::default())
}

/// Build a fresh registry holding the default tables.
///
/// # Errors
///
/// Returns [`RegistryError`] if the tables contain a duplicate scheme.
pub fn build_builtin() -> Result<ConnectorRegistry, RegistryError> {
    let mut builder = ConnectorRegistry::builder()
        .sql_family(sql_source)
        .source("csv", csv_source)
        .destination("csv", csv_destination)
        .destination("sqlite", sqlite_destination);
    for (scheme, ctor) in external::sources() {
        builder = builder.source(scheme, ctor);
    }
    for (scheme, ctor) in external::destinations() {
        builder = builder.destination(scheme, ctor);
    }
    builder.build()
}

static BUILTIN: LazyLock<ConnectorRegistry> =
    LazyLock::new(|| build_builtin().expect("built-in scheme tables are valid"));

/// Process-wide default registry. Immutable and safe to share across threads.
#[must_use]
pub fn builtin() -> &'static ConnectorRegistry {
    &BUILTIN
}
