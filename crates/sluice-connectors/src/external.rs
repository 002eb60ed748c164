//! Catalog entries for adapters linked outside this crate.
//!
//! Each entry declares what the scheme's adapter supports (incrementality,
//! table naming) so resolution, planning and `check` work without the
//! adapter present. Moving data through one fails with
//! `ADAPTER_NOT_LINKED`.

use sluice_engine::contract::{BatchIter, ExtractRequest};
use sluice_engine::registry::{DestinationCtor, SourceCtor};
use sluice_engine::{DestinationHandle, Extractable, Loadable, RunParameters};
use sluice_types::batch::Options;
use sluice_types::error::ConnectorError;
use sluice_types::wire::Incrementality;

fn not_linked(id: &str) -> ConnectorError {
    ConnectorError::config(
        "ADAPTER_NOT_LINKED",
        format!("the {id} adapter is not linked into this build"),
    )
}

/// Source whose extraction lives in a separate adapter.
#[derive(Debug, Clone, Copy)]
pub struct ExternalSource {
    id: &'static str,
    incrementality: Incrementality,
}

impl ExternalSource {
    #[must_use]
    pub const fn new(id: &'static str, incrementality: Incrementality) -> Self {
        Self { id, incrementality }
    }
}

impl Extractable for ExternalSource {
    fn adapter_id(&self) -> &'static str {
        self.id
    }

    fn incrementality(&self, _uri: &str) -> Incrementality {
        self.incrementality
    }

    fn produce(
        &self,
        _uri: &str,
        _table: &str,
        _request: ExtractRequest,
    ) -> Result<BatchIter, ConnectorError> {
        Err(not_linked(self.id))
    }
}

/// Destination whose loading lives in a separate adapter.
#[derive(Debug, Clone, Copy)]
pub struct ExternalDestination {
    id: &'static str,
    require_dataset: bool,
}

impl ExternalDestination {
    #[must_use]
    pub const fn new(id: &'static str, require_dataset: bool) -> Self {
        Self {
            id,
            require_dataset,
        }
    }
}

impl Loadable for ExternalDestination {
    fn adapter_id(&self) -> &'static str {
        self.id
    }

    fn run_parameters(
        &self,
        _uri: &str,
        table: &str,
        _options: &Options,
    ) -> Result<RunParameters, ConnectorError> {
        RunParameters::from_table(table, self.require_dataset)
    }

    fn bind(
        &mut self,
        _uri: &str,
        _params: &RunParameters,
        _options: &Options,
    ) -> Result<Box<dyn DestinationHandle>, ConnectorError> {
        Err(not_linked(self.id))
    }
}

macro_rules! source_catalog {
    ($($scheme:literal => $id:literal, $inc:ident;)*) => {
        /// Named sources served by external adapters.
        pub(crate) fn sources() -> Vec<(&'static str, SourceCtor)> {
            vec![$(($scheme, {
                fn ctor() -> Box<dyn Extractable> {
                    Box::new(ExternalSource::new($id, Incrementality::$inc))
                }
                ctor as SourceCtor
            })),*]
        }
    };
}

macro_rules! destination_catalog {
    ($($scheme:literal => $id:literal, $dataset:literal;)*) => {
        /// Destinations served by external adapters.
        pub(crate) fn destinations() -> Vec<(&'static str, DestinationCtor)> {
            vec![$(($scheme, {
                fn ctor() -> Box<dyn Loadable> {
                    Box::new(ExternalDestination::new($id, $dataset))
                }
                ctor as DestinationCtor
            })),*]
        }
    };
}

source_catalog! {
    "mongodb" => "mongodb", CallerManaged;
    "mongodb+srv" => "mongodb", CallerManaged;
    "notion" => "notion", FullRefreshOnly;
    "gsheets" => "gsheets", FullRefreshOnly;
    "shopify" => "shopify", AdapterManaged;
    "gorgias" => "gorgias", AdapterManaged;
    "github" => "github", AdapterManaged;
    "chess" => "chess", FullRefreshOnly;
    "stripe" => "stripe", AdapterManaged;
    "facebookads" => "facebookads", AdapterManaged;
    "slack" => "slack", AdapterManaged;
    "hubspot" => "hubspot", AdapterManaged;
    "airtable" => "airtable", FullRefreshOnly;
    "klaviyo" => "klaviyo", AdapterManaged;
    "mixpanel" => "mixpanel", AdapterManaged;
    "appsflyer" => "appsflyer", AdapterManaged;
    "kafka" => "kafka", AdapterManaged;
    "adjust" => "adjust", AdapterManaged;
    "zendesk" => "zendesk", AdapterManaged;
    "mmap" => "mmap", FullRefreshOnly;
    "s3" => "s3", CallerManaged;
    "dynamodb" => "dynamodb", CallerManaged;
    "asana" => "asana", AdapterManaged;
    "tiktok" => "tiktok", AdapterManaged;
    "googleanalytics" => "googleanalytics", AdapterManaged;
    "googleads" => "googleads", AdapterManaged;
    "appstore" => "appstore", AdapterManaged;
    "gs" => "gs", CallerManaged;
    "linkedinads" => "linkedinads", AdapterManaged;
    "linear" => "linear", AdapterManaged;
    "applovin" => "applovin", AdapterManaged;
    "applovinmax" => "applovinmax", AdapterManaged;
    "salesforce" => "salesforce", AdapterManaged;
    "personio" => "personio", AdapterManaged;
    "kinesis" => "kinesis", AdapterManaged;
    "pipedrive" => "pipedrive", AdapterManaged;
    "frankfurter" => "frankfurter", AdapterManaged;
    "freshdesk" => "freshdesk", AdapterManaged;
    "trustpilot" => "trustpilot", AdapterManaged;
    "phantombuster" => "phantombuster", AdapterManaged;
    "elasticsearch" => "elasticsearch", CallerManaged;
    "attio" => "attio", AdapterManaged;
    "solidgate" => "solidgate", AdapterManaged;
    "quickbooks" => "quickbooks", AdapterManaged;
    "isoc-pulse" => "isoc-pulse", AdapterManaged;
    "smartsheet" => "smartsheet", FullRefreshOnly;
    "sftp" => "sftp", CallerManaged;
    "pinterest" => "pinterest", AdapterManaged;
    "zoom" => "zoom", AdapterManaged;
    "clickup" => "clickup", AdapterManaged;
    "influxdb" => "influxdb", CallerManaged;
}

destination_catalog! {
    "bigquery" => "bigquery", true;
    "cratedb" => "cratedb", true;
    "databricks" => "databricks", true;
    "duckdb" => "duckdb", true;
    "mssql" => "mssql", true;
    "postgres" => "postgres", true;
    "postgresql" => "postgres", true;
    "postgresql+psycopg2" => "postgres", true;
    "redshift" => "redshift", true;
    "redshift+psycopg2" => "redshift", true;
    "redshift+redshift_connector" => "redshift", true;
    "snowflake" => "snowflake", true;
    "synapse" => "synapse", true;
    "athena" => "athena", true;
    "clickhouse+native" => "clickhouse", true;
    "clickhouse" => "clickhouse", true;
    "s3" => "s3", false;
    "gs" => "gs", false;
    "mysql" => "mysql", true;
    "mysql+pymysql" => "mysql", true;
}
