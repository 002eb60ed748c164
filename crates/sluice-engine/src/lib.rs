//! Connector resolution and incremental-sync contract layer.
//!
//! Given a source and a destination Location URI, [`resolve`] selects one
//! [`Extractable`] and one [`Loadable`] from a [`ConnectorRegistry`]. The
//! [`incremental`] module governs who owns the watermark, and
//! [`orchestrator::run_job`] drives a single job through extract, load and
//! post-load using only those two contracts.

#![warn(clippy::pedantic)]

pub mod config;
pub mod contract;
pub mod error;
pub mod incremental;
pub mod orchestrator;
pub mod registry;
pub mod resolve;
pub mod result;
pub mod sql_family;

pub use contract::{DestinationHandle, Extractable, Loadable, RunParameters};
pub use error::PipelineError;
pub use incremental::{plan_sync, AdapterState, CancelToken, SyncPlan, SyncRequest};
pub use orchestrator::{check_job, run_job, JobSpec};
pub use registry::{ConnectorRegistry, RegistryBuilder, SourceScheme};
pub use resolve::{check, resolve, ResolveError, ResolvedConnectors};
pub use result::{CheckResult, JobResult};
pub use sql_family::SqlEngine;
