//! The SQL-family scheme set.
//!
//! Every scheme listed here resolves, on the source side, to one shared
//! relational adapter. The concrete engine is kept so that adapter can
//! branch on it.

use std::fmt;

/// Scheme aliases that select the generic SQL source, lowercase.
pub const FAMILY_SCHEMES: &[&str] = &[
    "bigquery",
    "crate",
    "duckdb",
    "mssql",
    "mssql+pyodbc",
    "mysql",
    "mysql+pymysql",
    "mysql+mysqlconnector",
    "postgres",
    "postgresql",
    "postgresql+psycopg2",
    "redshift",
    "redshift+psycopg2",
    "snowflake",
    "sqlite",
    "oracle",
    "oracle+cx_oracle",
    "hana",
    "clickhouse",
    "databricks",
    "db2",
    "spanner",
];

/// Concrete relational engine named by a SQL-family scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlEngine {
    BigQuery,
    CrateDb,
    DuckDb,
    MsSql,
    MySql,
    Postgres,
    Redshift,
    Snowflake,
    Sqlite,
    Oracle,
    Hana,
    ClickHouse,
    Databricks,
    Db2,
    Spanner,
}

impl SqlEngine {
    /// Map a lowercase scheme to its engine. `None` outside the family.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        let engine = match scheme {
            "bigquery" => Self::BigQuery,
            "crate" => Self::CrateDb,
            "duckdb" => Self::DuckDb,
            "mssql" | "mssql+pyodbc" => Self::MsSql,
            "mysql" | "mysql+pymysql" | "mysql+mysqlconnector" => Self::MySql,
            "postgres" | "postgresql" | "postgresql+psycopg2" => Self::Postgres,
            "redshift" | "redshift+psycopg2" => Self::Redshift,
            "snowflake" => Self::Snowflake,
            "sqlite" => Self::Sqlite,
            "oracle" | "oracle+cx_oracle" => Self::Oracle,
            "hana" => Self::Hana,
            "clickhouse" => Self::ClickHouse,
            "databricks" => Self::Databricks,
            "db2" => Self::Db2,
            "spanner" => Self::Spanner,
            _ => return None,
        };
        Some(engine)
    }

    /// Canonical engine name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BigQuery => "bigquery",
            Self::CrateDb => "crate",
            Self::DuckDb => "duckdb",
            Self::MsSql => "mssql",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Redshift => "redshift",
            Self::Snowflake => "snowflake",
            Self::Sqlite => "sqlite",
            Self::Oracle => "oracle",
            Self::Hana => "hana",
            Self::ClickHouse => "clickhouse",
            Self::Databricks => "databricks",
            Self::Db2 => "db2",
            Self::Spanner => "spanner",
        }
    }
}

impl fmt::Display for SqlEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
