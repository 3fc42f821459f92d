//! Parameter types for BigQuery MCP tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::format::OutputFormat;

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListDatasetsParams {
    #[schemars(description = "Project ID to list datasets from (default: billing project)")]
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListTablesParams {
    #[schemars(description = "Dataset as 'dataset' (billing project) or 'project.dataset'")]
    pub dataset_path: String,

    #[schemars(description = "Filter by type: 'all', 'table', 'view' or 'materialized_view' (default: all)")]
    #[serde(default)]
    pub table_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TablePathParams {
    #[schemars(description = "Table as 'dataset.table' (billing project) or 'project.dataset.table'")]
    pub table_path: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeTableParams {
    #[schemars(description = "Table as 'dataset.table' (billing project) or 'project.dataset.table'")]
    pub table_path: String,

    #[schemars(description = "Rows to sample (default: 1000, capped at the server's max row limit)")]
    #[serde(default)]
    pub sample_size: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeColumnsParams {
    #[schemars(description = "Table as 'dataset.table' (billing project) or 'project.dataset.table'")]
    pub table_path: String,

    #[schemars(description = "Columns to analyze (default: all columns)")]
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    #[schemars(description = "Include the most frequent values for string columns (default: true)")]
    #[serde(default)]
    pub include_examples: Option<bool>,

    #[schemars(description = "Rows to sample per column (default: 10000, max: 100000)")]
    #[serde(default)]
    pub sample_size: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteQueryParams {
    #[schemars(description = "GoogleSQL SELECT query to run")]
    pub query: String,

    #[schemars(description = "Project to run the query in (default: billing project)")]
    #[serde(default)]
    pub project: Option<String>,

    #[schemars(description = "Default dataset for unqualified table names")]
    #[serde(default)]
    pub dataset: Option<String>,

    #[schemars(description = "Output format: 'json' (default), 'csv' or 'table'")]
    #[serde(default)]
    pub format: Option<OutputFormat>,

    #[schemars(description = "Row limit applied when the query has no LIMIT (clamped to the server max)")]
    #[serde(default)]
    pub limit: Option<u64>,

    #[schemars(description = "Timeout in seconds (clamped to the server max)")]
    #[serde(default)]
    pub timeout: Option<u64>,

    #[schemars(description = "Validate and estimate cost without running the query")]
    #[serde(default)]
    pub dry_run: Option<bool>,

    #[schemars(
        description = "Named query parameters referenced as @name, e.g. {\"country\": \"FR\", \"min_total\": 100}"
    )]
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ValidateQueryParams {
    #[schemars(description = "GoogleSQL query to check")]
    pub query: String,

    #[schemars(description = "Project the query would run in (default: billing project)")]
    #[serde(default)]
    pub project: Option<String>,

    #[schemars(description = "Default dataset the query would use")]
    #[serde(default)]
    pub dataset: Option<String>,

    #[schemars(description = "Row limit to apply when the query has no LIMIT")]
    #[serde(default)]
    pub limit: Option<u64>,
}
