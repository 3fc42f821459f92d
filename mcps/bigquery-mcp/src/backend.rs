//! BigQuery backend abstraction
//!
//! Tool handlers talk to BigQuery only through [`BigQueryBackend`]. The REST
//! implementation lives in [`crate::rest`]; tests substitute an in-memory one.
//! Backends never enforce access policy: callers authorize first.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::BqError;

/// A result row keyed by column name, in schema order
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Sub-fields of a RECORD
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: "NULLABLE".to_string(),
            description: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REPEATED")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub table_id: String,
    pub table_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partitioning {
    #[serde(rename = "type")]
    pub partition_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub require_partition_filter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    pub table_type: String,
    pub description: String,
    pub num_rows: u64,
    pub num_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub schema: Vec<SchemaField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<Partitioning>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clustering_fields: Vec<String>,
}

impl TableMetadata {
    pub fn full_path(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Named query parameter (`@name` in SQL)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    pub name: String,
    /// GoogleSQL type name: STRING, INT64, FLOAT64, BOOL
    pub param_type: &'static str,
    /// Value rendered as BigQuery expects it in the REST API; `None` is NULL
    pub value: Option<String>,
}

/// A gate-approved query, ready to submit
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Project the job runs in
    pub project_id: String,
    pub sql: String,
    /// Dataset that unqualified table names resolve against
    pub default_dataset: Option<String>,
    pub location: String,
    pub timeout: Duration,
    pub max_bytes_billed: u64,
    /// Stop fetching after this many rows
    pub max_rows: u64,
    pub parameters: Vec<QueryParameter>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub schema: Vec<SchemaField>,
    pub rows: Vec<Row>,
    pub total_rows: u64,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cache_hit: bool,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DryRunOutcome {
    pub schema: Vec<SchemaField>,
    pub bytes_processed: u64,
}

#[async_trait]
pub trait BigQueryBackend: Send + Sync {
    /// Backend name reported by health_check
    fn name(&self) -> &str;

    async fn list_datasets(&self, project: &str) -> Result<Vec<DatasetInfo>, BqError>;

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableSummary>, BqError>;

    async fn get_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableMetadata, BqError>;

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryOutcome, BqError>;

    /// Validate and estimate a query without running it
    async fn dry_run(&self, request: &QueryRequest) -> Result<DryRunOutcome, BqError>;
}
