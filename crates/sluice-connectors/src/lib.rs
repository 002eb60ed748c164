//! Built-in adapters and the process-wide default registry.
//!
//! `SQLite` and local CSV files are handled in-process. Every other scheme
//! of the default tables is a catalog entry whose extraction or loading is
//! provided by a separately linked adapter.

#![warn(clippy::pedantic)]

pub mod builtin;
pub mod csv_file;
pub mod external;
mod path;
pub mod sql;
pub mod sqlite;

pub use builtin::{build_builtin, builtin};
