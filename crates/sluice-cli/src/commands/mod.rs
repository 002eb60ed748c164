pub mod check;
pub mod connectors;
pub mod ingest;
pub mod run;
