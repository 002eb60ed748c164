//! Watermark persistence for the sluice engine.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for cursor tracking and run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;
