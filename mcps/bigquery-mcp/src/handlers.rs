//! Tool handlers
//!
//! Every handler checks access before it calls the backend, and every query
//! text (including the profiling SQL built here) goes through the gate.
//! Handlers return `Result<_, BqError>`; the server turns errors into the
//! error envelope.

use std::time::{Duration, Instant};

use query_gate::{Authorized, GateRequest, LimitAction, PolicySnapshot};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::analysis::{
    analysis_summary, build_profile_query, compact_profile, profile_sample, summarize_profile,
    unknown_columns,
};
use crate::backend::{QueryOutcome, QueryParameter, QueryRequest, Row, SchemaField};
use crate::config::Config;
use crate::format::{
    bytes_to_mb, estimate_complexity, estimate_cost_usd, format_schema, format_table_info, to_csv,
    to_table, truncate_for_log, OutputFormat,
};
use crate::params::*;
use crate::state::ServerState;
use crate::types::{BqError, ExecutionCode};

const LOGGED_QUERY_CHARS: usize = 500;
const DEFAULT_ANALYZE_TABLE_SAMPLE: u64 = 1_000;
const DEFAULT_ANALYZE_COLUMNS_SAMPLE: u64 = 10_000;
const MAX_ANALYZE_COLUMNS_SAMPLE: u64 = 100_000;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Path parsing
// ============================================================================

/// Project ids: letters, digits, `-` and `_`
fn valid_project(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Dataset ids: letters, digits and `_`
fn valid_dataset(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Table ids also allow `-`
fn valid_table(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim().trim_matches('`').split('.').collect()
}

/// `dataset.table` (billing project) or `project.dataset.table`
pub fn parse_table_path(path: &str, billing_project: &str) -> Result<(String, String, String), BqError> {
    let parts = split_path(path);
    let (project, dataset, table) = match parts.as_slice() {
        [dataset, table] => (billing_project, *dataset, *table),
        [project, dataset, table] => (*project, *dataset, *table),
        _ => return Err(BqError::InvalidTablePath(path.to_string())),
    };
    if !valid_project(project) || !valid_dataset(dataset) || !valid_table(table) {
        return Err(BqError::InvalidTablePath(path.to_string()));
    }
    Ok((project.to_string(), dataset.to_string(), table.to_string()))
}

/// `dataset` (billing project) or `project.dataset`
pub fn parse_dataset_path(path: &str, billing_project: &str) -> Result<(String, String), BqError> {
    let parts = split_path(path);
    let (project, dataset) = match parts.as_slice() {
        [dataset] => (billing_project, *dataset),
        [project, dataset] => (*project, *dataset),
        _ => return Err(BqError::InvalidDatasetPath(path.to_string())),
    };
    if !valid_project(project) || !valid_dataset(dataset) {
        return Err(BqError::InvalidDatasetPath(path.to_string()));
    }
    Ok((project.to_string(), dataset.to_string()))
}

// ============================================================================
// Query helpers
// ============================================================================

fn is_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Named query parameters with their types inferred from the JSON values
pub fn build_parameters(values: Option<Map<String, Value>>) -> Result<Vec<QueryParameter>, BqError> {
    let Some(values) = values else {
        return Ok(Vec::new());
    };

    values
        .into_iter()
        .map(|(name, value)| {
            if !is_parameter_name(&name) {
                return Err(BqError::InvalidArgument(format!(
                    "Invalid query parameter name '{}'",
                    name
                )));
            }
            let (param_type, value) = match value {
                Value::Null => ("STRING", None),
                Value::Bool(b) => ("BOOL", Some(b.to_string())),
                Value::Number(n) if n.is_i64() || n.is_u64() => ("INT64", Some(n.to_string())),
                Value::Number(n) => ("FLOAT64", Some(n.to_string())),
                Value::String(s) => ("STRING", Some(s)),
                Value::Array(_) | Value::Object(_) => {
                    return Err(BqError::InvalidArgument(format!(
                        "Query parameter '{}' must be a string, number, boolean or null",
                        name
                    )))
                }
            };
            Ok(QueryParameter {
                name,
                param_type,
                value,
            })
        })
        .collect()
}

fn limit_json(limit: LimitAction) -> Value {
    match limit {
        LimitAction::Kept(n) => json!({ "action": "kept", "value": n }),
        LimitAction::Injected(n) => json!({ "action": "injected", "value": n }),
        LimitAction::Clamped { requested, applied } => {
            json!({ "action": "clamped", "requested": requested, "value": applied })
        }
    }
}

fn query_request(
    authorized: &Authorized,
    config: &Config,
    timeout: Duration,
    parameters: Vec<QueryParameter>,
) -> QueryRequest {
    QueryRequest {
        project_id: authorized.project_id.clone(),
        sql: authorized.query.clone(),
        default_dataset: authorized.dataset_id.clone(),
        location: config.location.clone(),
        timeout,
        max_bytes_billed: config.limits.max_bytes_processed,
        max_rows: authorized.limit.applied(),
        parameters,
    }
}

fn log_query(config: &Config, authorized: &Authorized) {
    if config.logging.log_queries {
        tracing::info!(
            project = %authorized.project_id,
            complexity = estimate_complexity(&authorized.query).as_str(),
            query = %truncate_for_log(&authorized.query, LOGGED_QUERY_CHARS),
            "Executing query"
        );
    }
}

/// Run an authorized query under the configured timeout
async fn run_authorized(
    state: &ServerState,
    config: &Config,
    authorized: &Authorized,
) -> Result<QueryOutcome, BqError> {
    let timeout = Duration::from_secs(config.limits.max_query_timeout);
    let request = query_request(authorized, config, timeout, Vec::new());
    log_query(config, authorized);
    with_timeout(timeout, state.backend().run_query(&request)).await
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl std::future::Future<Output = Result<T, BqError>>,
) -> Result<T, BqError> {
    tokio::time::timeout(timeout, call).await.map_err(|_| {
        BqError::Timeout(format!("query did not complete within {}s", timeout.as_secs()))
    })?
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Serialize)]
struct ProjectSummary {
    project_id: String,
    project_name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dataset_patterns: Option<Vec<String>>,
}

pub async fn list_projects(state: &ServerState) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);

    let projects: Vec<ProjectSummary> = policy
        .access
        .projects()
        .iter()
        .map(|entry| ProjectSummary {
            project_id: entry.project_id.clone(),
            project_name: entry.project_name.clone(),
            description: entry.description.clone(),
            dataset_patterns: (!config.compact_format).then(|| entry.pattern_strings()),
        })
        .collect();

    tracing::info!("Found {} accessible projects", projects.len());

    Ok(json!({
        "status": "success",
        "total_projects": projects.len(),
        "projects": projects,
        "billing_project": policy.access.billing_project(),
    }))
}

pub async fn list_datasets(state: &ServerState, params: ListDatasetsParams) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let project = policy.access.resolve_project(params.project.as_deref()).to_string();
    let entry = policy.access.check_project(&project)?;

    tracing::info!("Listing datasets in project: {}", project);
    let all = state.backend().list_datasets(&project).await?;
    let total_seen = all.len();

    let allowed: Vec<_> = all
        .into_iter()
        .filter(|d| entry.is_dataset_allowed(&d.dataset_id))
        .collect();
    let filtered = total_seen - allowed.len();
    state.record_access(&project, None).await;

    let datasets: Vec<Value> = if config.compact_format {
        allowed.iter().map(|d| json!(d.dataset_id)).collect()
    } else {
        allowed.iter().map(|d| json!(d)).collect()
    };

    let mut response = json!({
        "status": "success",
        "project": project,
        "datasets": datasets,
        "total_datasets": allowed.len(),
    });
    if !config.compact_format {
        response["allowed_patterns"] = json!(entry.pattern_strings());
    }
    if filtered > 0 {
        response["note"] = json!(format!(
            "{} datasets were filtered due to access restrictions",
            filtered
        ));
    }
    Ok(response)
}

fn parse_table_type(table_type: Option<&str>) -> Result<Option<&'static str>, BqError> {
    match table_type.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("all") => Ok(None),
        Some("table") => Ok(Some("TABLE")),
        Some("view") => Ok(Some("VIEW")),
        Some("materialized_view") => Ok(Some("MATERIALIZED_VIEW")),
        Some(other) => Err(BqError::InvalidArgument(format!(
            "Invalid table_type '{}'. Must be one of: all, table, view, materialized_view",
            other
        ))),
    }
}

pub async fn list_tables(state: &ServerState, params: ListTablesParams) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let type_filter = parse_table_type(params.table_type.as_deref())?;
    let (project, dataset) = parse_dataset_path(&params.dataset_path, policy.access.billing_project())?;
    policy.access.check_dataset(&project, &dataset)?;

    tracing::info!("Listing tables in dataset: {}.{}", project, dataset);
    let mut tables = state.backend().list_tables(&project, &dataset).await?;
    if let Some(wanted) = type_filter {
        tables.retain(|t| t.table_type.eq_ignore_ascii_case(wanted));
    }
    tables.sort_by(|a, b| a.table_id.cmp(&b.table_id));
    state.record_access(&project, Some(&dataset)).await;

    let listed: Vec<Value> = if config.compact_format {
        tables
            .iter()
            .map(|t| json!({ "name": t.table_id, "type": t.table_type }))
            .collect()
    } else {
        tables.iter().map(|t| json!(t)).collect()
    };

    let mut response = json!({
        "status": "success",
        "project": project,
        "dataset": dataset,
        "full_path": format!("{}.{}", project, dataset),
        "tables": listed,
        "total_tables": tables.len(),
    });
    if let Some(wanted) = type_filter {
        response["filtered_by_type"] = json!(wanted);
    }
    Ok(response)
}

pub async fn get_table_info(state: &ServerState, params: TablePathParams) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let (project, dataset, table) =
        parse_table_path(&params.table_path, policy.access.billing_project())?;
    policy.access.check_dataset(&project, &dataset)?;

    let metadata = state.backend().get_table(&project, &dataset, &table).await?;
    state.record_access(&project, Some(&dataset)).await;

    let mut info = format_table_info(&metadata, config.compact_format);
    info["status"] = json!("success");
    Ok(info)
}

// ============================================================================
// Analysis
// ============================================================================

pub async fn analyze_table(state: &ServerState, params: AnalyzeTableParams) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let (project, dataset, table) =
        parse_table_path(&params.table_path, policy.access.billing_project())?;
    policy.access.check_dataset(&project, &dataset)?;

    let metadata = state.backend().get_table(&project, &dataset, &table).await?;
    let sample_size = params
        .sample_size
        .unwrap_or(DEFAULT_ANALYZE_TABLE_SAMPLE)
        .clamp(1, config.limits.max_row_limit);
    tracing::info!("Analyzing table: {} (sample size: {})", metadata.full_path(), sample_size);

    let sql = format!("SELECT * FROM `{}` LIMIT {}", metadata.full_path(), sample_size);
    let authorized = policy.authorize(
        &GateRequest::new(&sql)
            .project(Some(project.as_str()))
            .dataset(Some(dataset.as_str())),
    )?;
    let outcome = run_authorized(state, &config, &authorized).await?;
    state.record_access(&project, Some(&dataset)).await;

    let schema = if metadata.schema.is_empty() {
        &outcome.schema
    } else {
        &metadata.schema
    };
    let columns = profile_sample(schema, &outcome.rows);
    let actual_rows = outcome.rows.len() as u64;

    if config.compact_format {
        let compact: Vec<Value> = columns
            .iter()
            .map(|c| {
                json!({
                    "name": c["name"],
                    "type": c["type"],
                    "nulls": c["null_percentage"],
                    "distinct": c["distinct_count"],
                    "category": c["classification"]["category"],
                })
            })
            .collect();
        let mut response = json!({
            "status": "success",
            "table": metadata.full_path(),
            "total_rows": metadata.num_rows,
            "size_mb": bytes_to_mb(metadata.num_bytes),
            "columns": compact,
        });
        if let Some(partitioning) = &metadata.partitioning {
            response["partitioned_by"] =
                json!(partitioning.field.clone().unwrap_or_else(|| "_PARTITIONTIME".to_string()));
        }
        return Ok(response);
    }

    let mut structure = json!({
        "column_count": metadata.schema.len(),
        "has_partitioning": metadata.partitioning.is_some(),
        "has_clustering": !metadata.clustering_fields.is_empty(),
        "table_type": metadata.table_type,
    });
    if let Some(partitioning) = &metadata.partitioning {
        structure["partitioning"] = json!(partitioning);
    }
    if !metadata.clustering_fields.is_empty() {
        structure["clustering"] = json!({ "fields": metadata.clustering_fields });
    }

    Ok(json!({
        "status": "success",
        "table": {
            "project": project,
            "dataset": dataset,
            "table_id": table,
            "full_path": metadata.full_path(),
        },
        "metadata": {
            "created": metadata.created.map(|ts| ts.to_rfc3339()),
            "modified": metadata.modified.map(|ts| ts.to_rfc3339()),
            "description": metadata.description,
            "location": metadata.location,
        },
        "statistics": {
            "total_rows": metadata.num_rows,
            "total_bytes": metadata.num_bytes,
            "size_mb": bytes_to_mb(metadata.num_bytes),
        },
        "structure": structure,
        "sample_info": {
            "requested_rows": sample_size,
            "actual_rows": actual_rows,
            "sampling_method": if actual_rows < metadata.num_rows { "LIMIT" } else { "FULL" },
        },
        "columns": columns,
    }))
}

pub async fn analyze_columns(
    state: &ServerState,
    params: AnalyzeColumnsParams,
) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let (project, dataset, table) =
        parse_table_path(&params.table_path, policy.access.billing_project())?;
    policy.access.check_dataset(&project, &dataset)?;

    let metadata = state.backend().get_table(&project, &dataset, &table).await?;

    let fields: Vec<_> = match params.columns.filter(|c| !c.is_empty()) {
        Some(requested) => {
            let unknown = unknown_columns(&metadata.schema, &requested);
            if !unknown.is_empty() {
                return Err(BqError::UnknownColumns(unknown));
            }
            requested
                .iter()
                .filter_map(|name| metadata.schema.iter().find(|f| &f.name == name))
                .collect()
        }
        None => metadata.schema.iter().collect(),
    };

    let sample_size = params
        .sample_size
        .unwrap_or(DEFAULT_ANALYZE_COLUMNS_SAMPLE)
        .clamp(1, MAX_ANALYZE_COLUMNS_SAMPLE);
    let include_examples = params.include_examples.unwrap_or(true);
    let full_path = metadata.full_path();
    tracing::info!("Analyzing {} columns in table: {}", fields.len(), full_path);

    let mut analyses = Vec::with_capacity(fields.len());
    for field in fields {
        let target = ProfileTarget {
            project: &project,
            dataset: &dataset,
            full_path: &full_path,
            sample_size,
        };
        let analysis = match profile_column(state, &config, &policy, &target, field).await {
            Ok(row) => summarize_profile(field, &row, include_examples),
            Err(e) => {
                tracing::warn!("Failed to analyze column {}: {}", field.name, e);
                json!({
                    "column_name": field.name,
                    "data_type": field.field_type,
                    "error": e.to_string(),
                })
            }
        };
        analyses.push(analysis);
    }
    state.record_access(&project, Some(&dataset)).await;

    let mut response = json!({
        "status": "success",
        "table": full_path,
        "columns_analyzed": analyses.len(),
        "sample_size": sample_size,
        "analysis_method": if metadata.num_rows > sample_size { "SAMPLE" } else { "FULL_SCAN" },
    });

    if config.compact_format {
        let compact: Map<String, Value> = analyses
            .iter()
            .map(|a| {
                let name = a["column_name"].as_str().unwrap_or_default().to_string();
                (name, compact_profile(a))
            })
            .collect();
        response["columns"] = Value::Object(compact);
    } else {
        response["summary"] = analysis_summary(&analyses);
        response["columns"] = Value::Array(analyses);
    }
    Ok(response)
}

/// Where a column profile runs
struct ProfileTarget<'a> {
    project: &'a str,
    dataset: &'a str,
    full_path: &'a str,
    sample_size: u64,
}

async fn profile_column(
    state: &ServerState,
    config: &Config,
    policy: &PolicySnapshot,
    target: &ProfileTarget<'_>,
    field: &SchemaField,
) -> Result<Row, BqError> {
    let sql = build_profile_query(target.full_path, field, target.sample_size);
    let authorized = policy.authorize(
        &GateRequest::new(&sql)
            .project(Some(target.project))
            .dataset(Some(target.dataset)),
    )?;
    let outcome = run_authorized(state, config, &authorized).await?;
    outcome.rows.into_iter().next().ok_or_else(|| BqError::Execution {
        code: ExecutionCode::Unknown,
        message: "profiling query returned no rows".to_string(),
    })
}

// ============================================================================
// Execution
// ============================================================================

pub async fn execute_query(state: &ServerState, params: ExecuteQueryParams) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);

    let authorized = policy.authorize(
        &GateRequest::new(&params.query)
            .project(params.project.as_deref())
            .dataset(params.dataset.as_deref())
            .row_limit(params.limit),
    )?;

    let max_timeout = config.limits.max_query_timeout;
    let timeout = Duration::from_secs(params.timeout.unwrap_or(max_timeout).clamp(1, max_timeout));
    let parameters = build_parameters(params.parameters)?;
    let request = query_request(&authorized, &config, timeout, parameters);
    let format = params.format.unwrap_or_default();

    log_query(&config, &authorized);
    state
        .record_access(&authorized.project_id, authorized.dataset_id.as_deref())
        .await;

    if params.dry_run.unwrap_or(false) {
        let estimate = with_timeout(timeout, state.backend().dry_run(&request)).await?;
        return Ok(json!({
            "status": "success",
            "dry_run": true,
            "query": authorized.query,
            "total_bytes_processed": estimate.bytes_processed,
            "total_bytes_billed": estimate.bytes_processed,
            "estimated_cost_usd": estimate_cost_usd(estimate.bytes_processed),
            "schema": format_schema(&estimate.schema, config.compact_format),
        }));
    }

    let started = Instant::now();
    let outcome = with_timeout(timeout, state.backend().run_query(&request)).await?;
    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!("Query completed in {:.2} seconds", elapsed);
    if config.logging.log_results {
        tracing::debug!("Query returned {} rows", outcome.rows.len());
    }

    let mut response = json!({
        "status": "success",
        "row_count": outcome.rows.len(),
        "total_rows": outcome.total_rows,
        "bytes_processed": outcome.bytes_processed,
        "bytes_billed": outcome.bytes_billed,
        "cache_hit": outcome.cache_hit,
        "execution_time_seconds": (elapsed * 1000.0).round() / 1000.0,
        "limit": limit_json(authorized.limit),
    });
    if let Some(job_id) = &outcome.job_id {
        response["job_id"] = json!(job_id);
    }

    match format {
        OutputFormat::Json => {
            if !config.compact_format && !outcome.schema.is_empty() {
                response["schema"] = format_schema(&outcome.schema, false);
            }
            response["results"] = Value::Array(outcome.rows.into_iter().map(Value::Object).collect());
        }
        OutputFormat::Csv => {
            response["format"] = json!(format.as_str());
            response["data"] = json!(to_csv(&outcome.schema, &outcome.rows)?);
        }
        OutputFormat::Table => {
            response["format"] = json!(format.as_str());
            response["data"] = json!(to_table(&outcome.schema, &outcome.rows));
        }
    }

    Ok(response)
}

pub async fn validate_query(state: &ServerState, params: ValidateQueryParams) -> Result<Value, BqError> {
    let active = state.active();
    let policy = &active.policy;
    let authorized = policy.authorize(
        &GateRequest::new(&params.query)
            .project(params.project.as_deref())
            .dataset(params.dataset.as_deref())
            .row_limit(params.limit),
    )?;

    Ok(json!({
        "status": "valid",
        "query": authorized.query,
        "project": authorized.project_id,
        "dataset": authorized.dataset_id,
        "limit": limit_json(authorized.limit),
        "tables_referenced": authorized
            .tables
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>(),
    }))
}

// ============================================================================
// Context
// ============================================================================

pub async fn get_current_context(state: &ServerState) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let last = state.last_access().await;

    let projects: Vec<Value> = policy
        .access
        .projects()
        .iter()
        .map(|entry| {
            json!({
                "project_id": entry.project_id,
                "dataset_patterns": entry.pattern_strings(),
                "is_billing_project": entry.project_id == policy.access.billing_project(),
            })
        })
        .collect();

    Ok(json!({
        "status": "success",
        "context": {
            "billing_project": policy.access.billing_project(),
            "location": config.location,
            "allowed_projects": projects,
            "last_accessed": last,
            "compact_format": config.compact_format,
            "limits": {
                "default_row_limit": policy.security.default_row_limit(),
                "max_row_limit": policy.security.max_row_limit(),
                "max_query_timeout": config.limits.max_query_timeout,
                "max_bytes_processed": config.limits.max_bytes_processed,
            },
            "security": {
                "select_only": policy.security.select_only(),
                "require_explicit_limits": policy.security.require_explicit_limit(),
            },
        },
    }))
}

pub async fn health_check(state: &ServerState) -> Result<Value, BqError> {
    let active = state.active();
    let (config, policy) = (&active.config, &active.policy);
    let billing = policy.access.billing_project().to_string();

    let probe = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, state.backend().list_datasets(&billing)).await;
    let (access_ok, access_check) = match probe {
        Ok(Ok(_)) => (true, json!({ "status": "ok", "project": billing })),
        Ok(Err(e)) => (
            false,
            json!({ "status": "error", "project": billing, "error": e.to_string(), "error_type": e.error_type() }),
        ),
        Err(_) => (
            false,
            json!({ "status": "error", "project": billing, "error": "timed out listing datasets" }),
        ),
    };

    Ok(json!({
        "status": if access_ok { "healthy" } else { "degraded" },
        "server": {
            "name": config.server_name,
            "version": config.server_version,
            "backend": state.backend().name(),
        },
        "checks": {
            "configuration": {
                "status": "ok",
                "projects": policy.access.projects().len(),
                "source": config.source.as_ref().map(|p| p.display().to_string()),
            },
            "bigquery_access": access_check,
            "location": config.location,
        },
    }))
}
