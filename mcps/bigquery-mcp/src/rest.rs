//! BigQuery REST backend
//!
//! Implements [`BigQueryBackend`] against the BigQuery v2 REST API.
//! See: https://cloud.google.com/bigquery/docs/reference/rest
//!
//! Access tokens come from `BIGQUERY_ACCESS_TOKEN` / `GOOGLE_OAUTH_ACCESS_TOKEN`
//! when set, otherwise from the gcloud CLI (ambient credentials).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::backend::{
    BigQueryBackend, DatasetInfo, DryRunOutcome, Partitioning, QueryOutcome, QueryRequest, Row,
    SchemaField, TableMetadata, TableSummary,
};
use crate::types::{classify_api_error, BqError, ExecutionCode};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// gcloud tokens live for an hour; refresh well before expiry
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Upper bound for a single server-side wait in jobs.query / getQueryResults
const POLL_WAIT: Duration = Duration::from_secs(10);

const PAGE_SIZE: u64 = 10_000;

// ============================================================================
// Access Tokens
// ============================================================================

struct CachedToken {
    token: String,
    fetched: Instant,
}

/// Supplies OAuth access tokens for API calls
pub struct TokenProvider {
    static_token: Option<String>,
    credentials_file: Option<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn from_env(credentials_file: Option<String>) -> Self {
        let static_token = ["BIGQUERY_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|token| !token.trim().is_empty());

        Self {
            static_token,
            credentials_file,
            cache: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, BqError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched.elapsed() < TOKEN_TTL {
                return Ok(cached.token.clone());
            }
        }

        let token = self.fetch_from_gcloud().await?;
        *cache = Some(CachedToken {
            token: token.clone(),
            fetched: Instant::now(),
        });
        Ok(token)
    }

    /// Drop a cached token the API refused
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn fetch_from_gcloud(&self) -> Result<String, BqError> {
        let mut cmd = Command::new("gcloud");
        match &self.credentials_file {
            Some(path) => {
                cmd.args(["auth", "application-default", "print-access-token"])
                    .env("GOOGLE_APPLICATION_CREDENTIALS", path);
            }
            None => {
                cmd.args(["auth", "print-access-token"]);
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| BqError::Authentication(format!("could not run gcloud: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BqError::Authentication(stderr.trim().to_string()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(BqError::Authentication(
                "gcloud returned an empty access token".to_string(),
            ));
        }

        tracing::debug!("Fetched access token from gcloud");
        Ok(token)
    }
}

// ============================================================================
// REST API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetItem {
    dataset_reference: DatasetReference,
    location: Option<String>,
    friendly_name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableItem {
    table_reference: TableReference,
    #[serde(rename = "type")]
    table_type: Option<String>,
    creation_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReference,
    #[serde(rename = "type")]
    table_type: Option<String>,
    description: Option<String>,
    num_rows: Option<String>,
    num_bytes: Option<String>,
    creation_time: Option<String>,
    last_modified_time: Option<String>,
    location: Option<String>,
    schema: Option<TableSchema>,
    time_partitioning: Option<TimePartitioning>,
    range_partitioning: Option<RangePartitioning>,
    #[serde(default)]
    require_partition_filter: bool,
    clustering: Option<Clustering>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimePartitioning {
    #[serde(rename = "type")]
    partition_type: Option<String>,
    field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangePartitioning {
    field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Clustering {
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    description: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

impl From<FieldSchema> for SchemaField {
    fn from(field: FieldSchema) -> Self {
        SchemaField {
            name: field.name,
            field_type: field.field_type,
            mode: field.mode.unwrap_or_else(|| "NULLABLE".to_string()),
            description: field.description.unwrap_or_default(),
            fields: field.fields.into_iter().map(SchemaField::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<ApiRow>,
    total_rows: Option<String>,
    total_bytes_processed: Option<String>,
    total_bytes_billed: Option<String>,
    #[serde(default)]
    cache_hit: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRow {
    #[serde(default)]
    f: Vec<ApiCell>,
}

#[derive(Debug, Deserialize)]
struct ApiCell {
    #[serde(default)]
    v: Value,
}

// ============================================================================
// Value decoding
// ============================================================================

fn parse_u64(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Epoch milliseconds as sent in creationTime / lastModifiedTime
fn parse_millis(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

/// TIMESTAMP cells are float seconds since the epoch, e.g. "1.7066784E9"
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = raw.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}

fn decode_row(fields: &[SchemaField], row: ApiRow) -> Row {
    let mut decoded = Map::with_capacity(fields.len());
    for (field, cell) in fields.iter().zip(row.f) {
        decoded.insert(field.name.clone(), decode_cell(field, cell.v));
    }
    decoded
}

fn decode_cell(field: &SchemaField, value: Value) -> Value {
    if field.is_repeated() {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| {
                        let inner = match item {
                            Value::Object(mut obj) => obj.remove("v").unwrap_or(Value::Null),
                            other => other,
                        };
                        decode_scalar(field, inner)
                    })
                    .collect(),
            ),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
    }
    decode_scalar(field, value)
}

fn decode_scalar(field: &SchemaField, value: Value) -> Value {
    let raw = match value {
        Value::Null => return Value::Null,
        Value::String(s) => s,
        Value::Object(mut obj) if !field.fields.is_empty() => {
            let cells = match obj.remove("f") {
                Some(Value::Array(cells)) => cells,
                _ => Vec::new(),
            };
            let mut record = Map::with_capacity(field.fields.len());
            for (sub, cell) in field.fields.iter().zip(cells) {
                let inner = match cell {
                    Value::Object(mut c) => c.remove("v").unwrap_or(Value::Null),
                    other => other,
                };
                record.insert(sub.name.clone(), decode_cell(sub, inner));
            }
            return Value::Object(record);
        }
        other => return other,
    };

    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw)),
        "FLOAT" | "FLOAT64" => match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Value::from(f),
            _ => Value::String(raw),
        },
        "BOOLEAN" | "BOOL" => match raw.parse::<bool>() {
            Ok(b) => Value::Bool(b),
            Err(_) => Value::String(raw),
        },
        "TIMESTAMP" => match parse_timestamp(&raw) {
            Some(ts) => Value::String(ts.to_rfc3339()),
            None => Value::String(raw),
        },
        // NUMERIC, BIGNUMERIC, STRING, BYTES (base64), DATE, DATETIME, TIME,
        // GEOGRAPHY and JSON keep BigQuery's string form
        _ => Value::String(raw),
    }
}

// ============================================================================
// Backend
// ============================================================================

/// BigQuery REST backend
pub struct RestBackend {
    client: Client,
    base_url: String,
    tokens: TokenProvider,
}

impl RestBackend {
    pub fn new(credentials_file: Option<String>) -> Result<Self, BqError> {
        let client = Client::builder()
            .user_agent(concat!("bigquery-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            tokens: TokenProvider::from_env(credentials_file),
        })
    }

    /// API URL for `segments`, each one percent-encoded as a single path
    /// segment so identifiers can never add or climb path levels
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BqError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| BqError::Configuration(format!("invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BqError::Configuration("API base URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BqError> {
        let token = self.tokens.token().await?;
        let response = request.bearer_auth(token).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            if status.as_u16() == 401 {
                self.tokens.invalidate().await;
            }
            return Err(classify_api_error(status.as_u16(), &message));
        }

        Ok(response.json().await?)
    }

    fn query_body(request: &QueryRequest, dry_run: bool) -> Value {
        let mut body = json!({
            "query": request.sql,
            "useLegacySql": false,
            "useQueryCache": true,
            "dryRun": dry_run,
            "location": request.location,
            "timeoutMs": request.timeout.min(POLL_WAIT).as_millis() as u64,
            "maxResults": request.max_rows.min(PAGE_SIZE),
            "maximumBytesBilled": request.max_bytes_billed.to_string(),
        });

        if let Some(dataset) = &request.default_dataset {
            body["defaultDataset"] = json!({
                "projectId": request.project_id,
                "datasetId": dataset,
            });
        }

        if !request.parameters.is_empty() {
            let parameters: Vec<Value> = request
                .parameters
                .iter()
                .map(|p| {
                    let value = match &p.value {
                        Some(v) => json!({ "value": v }),
                        None => json!({}),
                    };
                    json!({
                        "name": p.name,
                        "parameterType": { "type": p.param_type },
                        "parameterValue": value,
                    })
                })
                .collect();
            body["parameterMode"] = json!("NAMED");
            body["queryParameters"] = Value::Array(parameters);
        }

        body
    }

    async fn query_results(
        &self,
        project: &str,
        job: &JobReference,
        location: &str,
        wait: Duration,
        max_results: u64,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, BqError> {
        let url = self.endpoint(&["projects", project, "queries", job.job_id.as_str()])?;
        let mut params = vec![
            ("location", job.location.clone().unwrap_or_else(|| location.to_string())),
            ("timeoutMs", wait.min(POLL_WAIT).as_millis().to_string()),
            ("maxResults", max_results.min(PAGE_SIZE).to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.client.get(url).query(&params)).await
    }
}

#[async_trait]
impl BigQueryBackend for RestBackend {
    fn name(&self) -> &str {
        "bigquery-rest"
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<DatasetInfo>, BqError> {
        let url = self.endpoint(&["projects", project, "datasets"])?;
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(url.clone()).query(&[("all", "false")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: DatasetList = self.send(request).await?;

            datasets.extend(page.datasets.into_iter().map(|d| DatasetInfo {
                dataset_id: d.dataset_reference.dataset_id,
                location: d.location,
                friendly_name: d.friendly_name,
                labels: d.labels,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(datasets)
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableSummary>, BqError> {
        let url = self.endpoint(&["projects", project, "datasets", dataset, "tables"])?;
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: TableList = self.send(request).await?;

            tables.extend(page.tables.into_iter().map(|t| TableSummary {
                table_id: t.table_reference.table_id,
                table_type: t.table_type.unwrap_or_else(|| "TABLE".to_string()),
                created: parse_millis(t.creation_time.as_deref()),
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(tables)
    }

    async fn get_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableMetadata, BqError> {
        let url = self.endpoint(&["projects", project, "datasets", dataset, "tables", table])?;

        let resource: TableResource = match self.send(self.client.get(url)).await {
            Ok(resource) => resource,
            Err(BqError::Execution {
                code: ExecutionCode::ResourceNotFound,
                ..
            }) => {
                return Err(BqError::TableNotFound {
                    project: project.to_string(),
                    dataset: dataset.to_string(),
                    table: table.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let partitioning = match (resource.time_partitioning, resource.range_partitioning) {
            (Some(time), _) => Some(Partitioning {
                partition_type: time.partition_type.unwrap_or_else(|| "DAY".to_string()),
                field: time.field,
                require_partition_filter: resource.require_partition_filter,
            }),
            (None, Some(range)) => Some(Partitioning {
                partition_type: "RANGE".to_string(),
                field: range.field,
                require_partition_filter: resource.require_partition_filter,
            }),
            (None, None) => None,
        };

        Ok(TableMetadata {
            project_id: resource.table_reference.project_id,
            dataset_id: resource.table_reference.dataset_id,
            table_id: resource.table_reference.table_id,
            table_type: resource.table_type.unwrap_or_else(|| "TABLE".to_string()),
            description: resource.description.unwrap_or_default(),
            num_rows: parse_u64(resource.num_rows.as_deref()),
            num_bytes: parse_u64(resource.num_bytes.as_deref()),
            created: parse_millis(resource.creation_time.as_deref()),
            modified: parse_millis(resource.last_modified_time.as_deref()),
            location: resource.location,
            schema: resource
                .schema
                .unwrap_or_default()
                .fields
                .into_iter()
                .map(SchemaField::from)
                .collect(),
            partitioning,
            clustering_fields: resource.clustering.map(|c| c.fields).unwrap_or_default(),
        })
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryOutcome, BqError> {
        let deadline = Instant::now() + request.timeout;
        let url = self.endpoint(&["projects", request.project_id.as_str(), "queries"])?;
        let body = Self::query_body(request, false);

        let mut response: QueryResponse = self.send(self.client.post(url).json(&body)).await?;
        let job = response.job_reference.clone().ok_or_else(|| BqError::Execution {
            code: ExecutionCode::Unknown,
            message: "BigQuery response carried no job reference".to_string(),
        })?;

        while !response.job_complete {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BqError::Timeout(format!(
                    "query did not complete within {}s (job {})",
                    request.timeout.as_secs(),
                    job.job_id
                )));
            }
            tracing::debug!(job_id = %job.job_id, "Waiting for query job");
            response = self
                .query_results(
                    &request.project_id,
                    &job,
                    &request.location,
                    remaining,
                    request.max_rows,
                    None,
                )
                .await?;
        }

        let schema: Vec<SchemaField> = response
            .schema
            .take()
            .unwrap_or_default()
            .fields
            .into_iter()
            .map(SchemaField::from)
            .collect();

        let total_rows = parse_u64(response.total_rows.as_deref());
        let bytes_processed = parse_u64(response.total_bytes_processed.as_deref());
        let bytes_billed = parse_u64(response.total_bytes_billed.as_deref());
        let cache_hit = response.cache_hit;

        let max_rows = usize::try_from(request.max_rows).unwrap_or(usize::MAX);
        let mut rows: Vec<Row> = std::mem::take(&mut response.rows)
            .into_iter()
            .map(|row| decode_row(&schema, row))
            .collect();
        let mut page_token = response.page_token.take();

        while rows.len() < max_rows {
            let Some(token) = page_token.take().filter(|t| !t.is_empty()) else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(job_id = %job.job_id, "Timed out fetching result pages; returning partial rows");
                break;
            }
            let page = self
                .query_results(
                    &request.project_id,
                    &job,
                    &request.location,
                    remaining,
                    (max_rows - rows.len()) as u64,
                    Some(&token),
                )
                .await?;
            rows.extend(page.rows.into_iter().map(|row| decode_row(&schema, row)));
            page_token = page.page_token;
        }
        rows.truncate(max_rows);

        Ok(QueryOutcome {
            schema,
            rows,
            total_rows,
            bytes_processed,
            bytes_billed,
            cache_hit,
            job_id: Some(job.job_id),
        })
    }

    async fn dry_run(&self, request: &QueryRequest) -> Result<DryRunOutcome, BqError> {
        let url = self.endpoint(&["projects", request.project_id.as_str(), "queries"])?;
        let body = Self::query_body(request, true);
        let response: QueryResponse = self.send(self.client.post(url).json(&body)).await?;

        Ok(DryRunOutcome {
            schema: response
                .schema
                .unwrap_or_default()
                .fields
                .into_iter()
                .map(SchemaField::from)
                .collect(),
            bytes_processed: parse_u64(response.total_bytes_processed.as_deref()),
        })
    }
}
