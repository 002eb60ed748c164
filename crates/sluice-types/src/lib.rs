//! Shared model types for the sluice connector-resolution layer.
//!
//! This crate carries no I/O. Engine, state, and adapter crates all depend
//! on it so that schemes, cursors, and errors have a single definition.

#![warn(clippy::pedantic)]

pub mod batch;
pub mod cursor;
pub mod error;
pub mod scheme;
pub mod state;
pub mod wire;
