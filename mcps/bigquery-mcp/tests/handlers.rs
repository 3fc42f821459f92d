//! Handler tests against an in-memory backend

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bigquery_mcp::backend::{
    BigQueryBackend, DatasetInfo, DryRunOutcome, QueryOutcome, QueryRequest, Row, SchemaField,
    TableMetadata, TableSummary,
};
use bigquery_mcp::config::{parse_project_specs, Config, Settings};
use bigquery_mcp::format::OutputFormat;
use bigquery_mcp::handlers;
use bigquery_mcp::params::*;
use bigquery_mcp::response::respond;
use bigquery_mcp::{BigQueryMcpServer, BqError, ServerState};
use serde_json::{json, Value};

// ============================================================================
// Fake backend
// ============================================================================

#[derive(Default)]
struct FakeBackend {
    datasets: HashMap<String, Vec<&'static str>>,
    tables: Vec<TableMetadata>,
    rows: Vec<Row>,
    /// Every SQL text the backend was asked to run or dry-run
    seen: Mutex<Vec<QueryRequest>>,
}

impl FakeBackend {
    fn new() -> Self {
        let mut datasets = HashMap::new();
        datasets.insert(
            "proj1".to_string(),
            vec!["analytics_sales", "reporting", "staging_raw"],
        );

        let orders = TableMetadata {
            project_id: "proj1".into(),
            dataset_id: "analytics_sales".into(),
            table_id: "orders".into(),
            table_type: "TABLE".into(),
            description: "Orders".into(),
            num_rows: 50_000,
            num_bytes: 4_096,
            created: None,
            modified: None,
            location: Some("EU".into()),
            schema: vec![
                SchemaField::new("customer_id", "INT64"),
                SchemaField::new("country", "STRING"),
            ],
            partitioning: None,
            clustering_fields: Vec::new(),
        };
        let orders_view = TableMetadata {
            table_id: "orders_v".into(),
            table_type: "VIEW".into(),
            ..orders.clone()
        };

        let rows = vec![
            json!({"country": "FR", "total": 3}),
            json!({"country": "DE", "total": 5}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        Self {
            datasets,
            tables: vec![orders, orders_view],
            rows,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn last_sql(&self) -> Option<String> {
        self.seen.lock().unwrap().last().map(|r| r.sql.clone())
    }

    fn query_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn result_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::new("country", "STRING"),
        SchemaField::new("total", "INT64"),
    ]
}

#[async_trait]
impl BigQueryBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<DatasetInfo>, BqError> {
        Ok(self
            .datasets
            .get(project)
            .into_iter()
            .flatten()
            .map(|id| DatasetInfo {
                dataset_id: id.to_string(),
                location: Some("EU".into()),
                friendly_name: None,
                labels: Default::default(),
            })
            .collect())
    }

    async fn list_tables(&self, project: &str, dataset: &str) -> Result<Vec<TableSummary>, BqError> {
        Ok(self
            .tables
            .iter()
            .filter(|t| t.project_id == project && t.dataset_id == dataset)
            .map(|t| TableSummary {
                table_id: t.table_id.clone(),
                table_type: t.table_type.clone(),
                created: None,
            })
            .collect())
    }

    async fn get_table(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<TableMetadata, BqError> {
        self.tables
            .iter()
            .find(|t| t.project_id == project && t.dataset_id == dataset && t.table_id == table)
            .cloned()
            .ok_or_else(|| BqError::TableNotFound {
                project: project.into(),
                dataset: dataset.into(),
                table: table.into(),
            })
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryOutcome, BqError> {
        self.seen.lock().unwrap().push(request.clone());
        if request.sql.contains("sample_data") {
            let row = json!({"total_count": 100, "null_count": 10, "distinct_count": 40});
            return Ok(QueryOutcome {
                rows: row.as_object().cloned().into_iter().collect(),
                total_rows: 1,
                ..Default::default()
            });
        }
        Ok(QueryOutcome {
            schema: result_schema(),
            rows: self.rows.clone(),
            total_rows: self.rows.len() as u64,
            bytes_processed: 2_048,
            bytes_billed: 10_485_760,
            cache_hit: false,
            job_id: Some("job_123".into()),
        })
    }

    async fn dry_run(&self, request: &QueryRequest) -> Result<DryRunOutcome, BqError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(DryRunOutcome {
            schema: result_schema(),
            bytes_processed: 1_099_511_627_776,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config_with(specs: &[&str], compact: bool) -> Config {
    let settings = Settings {
        projects: Some(parse_project_specs(specs.iter().copied(), "test").unwrap()),
        compact_format: Some(compact),
        ..Settings::default()
    };
    Config::from_settings(settings, None).unwrap()
}

fn test_config() -> Config {
    config_with(
        &["proj1:analytics_*", "proj1:reporting", "public:usa_names"],
        false,
    )
}

fn setup() -> (Arc<ServerState>, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::new());
    let state = ServerState::new(test_config(), backend.clone()).unwrap();
    (Arc::new(state), backend)
}

fn query(sql: &str) -> ExecuteQueryParams {
    ExecuteQueryParams {
        query: sql.to_string(),
        ..Default::default()
    }
}

fn envelope(err: BqError) -> Value {
    let result = respond::<Value>(Err(err)).unwrap();
    assert_eq!(result.is_error, Some(true));
    let value = serde_json::to_value(&result).unwrap();
    serde_json::from_str(value["content"][0]["text"].as_str().unwrap()).unwrap()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_list_projects_reports_patterns() {
    let (state, _) = setup();
    let result = handlers::list_projects(&state).await.unwrap();

    assert_eq!(result["total_projects"], 2);
    assert_eq!(result["billing_project"], "proj1");
    assert_eq!(
        result["projects"][0]["dataset_patterns"],
        json!(["analytics_*", "reporting"])
    );
}

#[tokio::test]
async fn test_list_datasets_filters_disallowed() {
    let (state, _) = setup();
    let result = handlers::list_datasets(&state, ListDatasetsParams::default())
        .await
        .unwrap();

    let ids: Vec<&str> = result["datasets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["dataset_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["analytics_sales", "reporting"]);
    assert_eq!(result["total_datasets"], 2);
    assert_eq!(
        result["note"],
        "1 datasets were filtered due to access restrictions"
    );
}

#[tokio::test]
async fn test_list_datasets_unknown_project() {
    let (state, _) = setup();
    let err = handlers::list_datasets(
        &state,
        ListDatasetsParams {
            project: Some("other".into()),
        },
    )
    .await
    .unwrap_err();

    let body = envelope(err);
    assert_eq!(body["error_type"], "ProjectAccessError");
    assert_eq!(body["error_code"], "PROJECT_ACCESS_DENIED");
}

#[tokio::test]
async fn test_list_tables_denies_unlisted_dataset() {
    let (state, _) = setup();
    let err = handlers::list_tables(
        &state,
        ListTablesParams {
            dataset_path: "staging_raw".into(),
            table_type: None,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.error_type(), "DatasetAccessError");
}

#[tokio::test]
async fn test_list_tables_type_filter() {
    let (state, _) = setup();
    let result = handlers::list_tables(
        &state,
        ListTablesParams {
            dataset_path: "proj1.analytics_sales".into(),
            table_type: Some("view".into()),
        },
    )
    .await
    .unwrap();

    assert_eq!(result["total_tables"], 1);
    assert_eq!(result["tables"][0]["table_id"], "orders_v");
    assert_eq!(result["filtered_by_type"], "VIEW");
}

#[tokio::test]
async fn test_get_table_info_not_found() {
    let (state, _) = setup();
    let err = handlers::get_table_info(
        &state,
        TablePathParams {
            table_path: "analytics_sales.missing".into(),
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.error_type(), "TableNotFoundError");
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_execute_query_injects_limit() {
    let (state, backend) = setup();
    let result = handlers::execute_query(
        &state,
        query("SELECT country, COUNT(*) AS total FROM analytics_sales.orders GROUP BY country"),
    )
    .await
    .unwrap();

    assert_eq!(result["status"], "success");
    assert_eq!(result["row_count"], 2);
    assert_eq!(result["limit"]["action"], "injected");
    assert_eq!(result["limit"]["value"], 20);
    assert_eq!(result["job_id"], "job_123");
    assert_eq!(result["results"][0]["country"], "FR");

    let sql = backend.last_sql().unwrap();
    assert!(sql.ends_with("LIMIT 20"), "{}", sql);
}

#[tokio::test]
async fn test_execute_query_rejects_writes_without_calling_backend() {
    let (state, backend) = setup();
    let err = handlers::execute_query(&state, query("DELETE FROM analytics_sales.orders WHERE TRUE"))
        .await
        .unwrap_err();

    let body = envelope(err);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_type"], "SecurityError");
    assert!(body["suggested_action"].as_str().unwrap().contains("read-only"));
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_execute_query_denies_unlisted_table() {
    let (state, backend) = setup();
    let err = handlers::execute_query(&state, query("SELECT * FROM staging_raw.events"))
        .await
        .unwrap_err();

    assert_eq!(err.error_type(), "DatasetAccessError");
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_execute_query_csv_and_table_formats() {
    let (state, _) = setup();

    let csv = handlers::execute_query(
        &state,
        ExecuteQueryParams {
            format: Some(OutputFormat::Csv),
            ..query("SELECT country, total FROM reporting.totals")
        },
    )
    .await
    .unwrap();
    assert_eq!(csv["format"], "csv");
    assert!(csv["data"].as_str().unwrap().starts_with("country,total\nFR,3\n"));

    let table = handlers::execute_query(
        &state,
        ExecuteQueryParams {
            format: Some(OutputFormat::Table),
            ..query("SELECT country, total FROM reporting.totals")
        },
    )
    .await
    .unwrap();
    assert_eq!(table["format"], "table");
    assert!(table["data"].as_str().unwrap().contains("country | total"));
    assert!(table.get("results").is_none());
}

#[tokio::test]
async fn test_execute_query_dry_run_estimates_cost() {
    let (state, backend) = setup();
    let result = handlers::execute_query(
        &state,
        ExecuteQueryParams {
            dry_run: Some(true),
            ..query("SELECT * FROM analytics_sales.orders")
        },
    )
    .await
    .unwrap();

    assert_eq!(result["dry_run"], true);
    assert_eq!(result["estimated_cost_usd"], 5.0);
    assert_eq!(backend.query_count(), 1);
}

#[tokio::test]
async fn test_execute_query_passes_parameters_and_clamps_timeout() {
    let (state, backend) = setup();
    let mut params = query("SELECT * FROM analytics_sales.orders WHERE country = @country");
    params.parameters = json!({"country": "FR"}).as_object().cloned();
    params.timeout = Some(10_000);

    handlers::execute_query(&state, params).await.unwrap();

    let seen = backend.seen.lock().unwrap();
    let request = seen.last().unwrap();
    assert_eq!(request.parameters.len(), 1);
    assert_eq!(request.parameters[0].name, "country");
    assert_eq!(request.timeout.as_secs(), 60);
}

#[tokio::test]
async fn test_validate_query_reports_rewrite() {
    let (state, backend) = setup();
    let result = handlers::validate_query(
        &state,
        ValidateQueryParams {
            query: "SELECT * FROM analytics_sales.orders LIMIT 50000".into(),
            project: None,
            dataset: None,
            limit: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(result["status"], "valid");
    assert_eq!(result["limit"]["action"], "clamped");
    assert_eq!(result["limit"]["requested"], 50000);
    assert_eq!(result["tables_referenced"][0], "proj1.analytics_sales.orders");
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_validate_query_rejects_multiple_statements() {
    let (state, _) = setup();
    let err = handlers::validate_query(
        &state,
        ValidateQueryParams {
            query: "SELECT 1; SELECT 2".into(),
            project: None,
            dataset: None,
            limit: None,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.error_type(), "SQLValidationError");
}

// ============================================================================
// Analysis
// ============================================================================

#[tokio::test]
async fn test_analyze_table_samples_through_gate() {
    let backend = Arc::new(FakeBackend::new());
    let mut config = test_config();
    config.limits.max_row_limit = 100;
    let state = ServerState::new(config, backend.clone()).unwrap();

    let result = handlers::analyze_table(
        &state,
        AnalyzeTableParams {
            table_path: "analytics_sales.orders".into(),
            sample_size: Some(5_000),
        },
    )
    .await
    .unwrap();

    assert_eq!(
        backend.last_sql().unwrap(),
        "SELECT * FROM `proj1.analytics_sales.orders` LIMIT 100"
    );
    assert_eq!(result["table"]["full_path"], "proj1.analytics_sales.orders");
    assert_eq!(result["statistics"]["total_rows"], 50_000);
    assert_eq!(result["sample_info"]["requested_rows"], 100);
    assert_eq!(result["sample_info"]["actual_rows"], 2);
    assert_eq!(result["sample_info"]["sampling_method"], "LIMIT");
    assert_eq!(result["columns"][1]["name"], "country");
    assert_eq!(result["columns"][1]["distinct_count"], 2);
    assert_eq!(result["columns"][0]["null_percentage"], 100.0);
}

#[tokio::test]
async fn test_analyze_table_compact() {
    let backend = Arc::new(FakeBackend::new());
    let config = config_with(&["proj1:analytics_*"], true);
    let state = ServerState::new(config, backend.clone()).unwrap();

    let result = handlers::analyze_table(
        &state,
        AnalyzeTableParams {
            table_path: "proj1.analytics_sales.orders".into(),
            sample_size: None,
        },
    )
    .await
    .unwrap();

    assert!(backend.last_sql().unwrap().ends_with("LIMIT 1000"));
    assert_eq!(result["table"], "proj1.analytics_sales.orders");
    assert_eq!(result["size_mb"], 0.0);
    assert_eq!(result["columns"][1]["name"], "country");
    assert_eq!(result["columns"][1]["distinct"], 2);
    assert!(result.get("sample_info").is_none());
}

#[tokio::test]
async fn test_analyze_table_denies_unlisted_dataset() {
    let (state, backend) = setup();
    let err = handlers::analyze_table(
        &state,
        AnalyzeTableParams {
            table_path: "staging_raw.orders".into(),
            sample_size: None,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.error_type(), "DatasetAccessError");
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_path_arguments_cannot_escape_their_segment() {
    let (state, backend) = setup();

    let err = handlers::get_table_info(
        &state,
        TablePathParams {
            table_path: "analytics_sales.%2e%2e/%2e%2e/secret/tables/t".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BqError::InvalidTablePath(_)));

    let err = handlers::list_tables(
        &state,
        ListTablesParams {
            dataset_path: "analytics_x/%2e%2e/secret".into(),
            table_type: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BqError::InvalidDatasetPath(_)));

    let err = handlers::analyze_columns(
        &state,
        AnalyzeColumnsParams {
            table_path: "proj1.analytics_sales.orders?fields=x".into(),
            columns: None,
            include_examples: None,
            sample_size: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BqError::InvalidTablePath(_)));
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_analyze_columns_unknown_column() {
    let (state, backend) = setup();
    let err = handlers::analyze_columns(
        &state,
        AnalyzeColumnsParams {
            table_path: "analytics_sales.orders".into(),
            columns: Some(vec!["country".into(), "nope".into()]),
            include_examples: None,
            sample_size: None,
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BqError::UnknownColumns(ref c) if c == &["nope".to_string()]));
    assert_eq!(backend.query_count(), 0);
}

#[tokio::test]
async fn test_analyze_columns_profiles_through_gate() {
    let (state, backend) = setup();
    let result = handlers::analyze_columns(
        &state,
        AnalyzeColumnsParams {
            table_path: "analytics_sales.orders".into(),
            columns: Some(vec!["customer_id".into()]),
            include_examples: None,
            sample_size: Some(500),
        },
    )
    .await
    .unwrap();

    assert_eq!(result["columns_analyzed"], 1);
    assert_eq!(result["analysis_method"], "SAMPLE");
    assert_eq!(result["columns"][0]["null_analysis"]["null_count"], 10);

    let sql = backend.last_sql().unwrap();
    assert!(sql.contains("LIMIT 500"));
    assert!(sql.contains("`proj1.analytics_sales.orders`"));
}

// ============================================================================
// Context and reload
// ============================================================================

#[tokio::test]
async fn test_context_tracks_last_access() {
    let (state, _) = setup();
    handlers::get_table_info(
        &state,
        TablePathParams {
            table_path: "analytics_sales.orders".into(),
        },
    )
    .await
    .unwrap();

    let context = handlers::get_current_context(&state).await.unwrap();
    assert_eq!(context["context"]["last_accessed"]["project"], "proj1");
    assert_eq!(
        context["context"]["last_accessed"]["dataset"],
        "analytics_sales"
    );
    assert_eq!(context["context"]["limits"]["default_row_limit"], 20);
}

#[tokio::test]
async fn test_reload_swaps_policy() {
    let (state, _) = setup();
    let server = BigQueryMcpServer::new(Arc::clone(&state));

    server
        .reload(config_with(&["proj1:reporting"], true))
        .unwrap();

    let err = handlers::execute_query(&state, query("SELECT * FROM analytics_sales.orders"))
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), "DatasetAccessError");
    assert!(state.active().config.compact_format);
}

#[tokio::test]
async fn test_reload_publishes_config_and_policy_together() {
    let (state, _) = setup();
    let held = state.active();
    state
        .reload(config_with(&["proj1:reporting"], true))
        .unwrap();

    // A call already holding the old bundle keeps both halves of it
    assert!(!held.config.compact_format);
    assert!(held.policy.access.is_dataset_allowed("proj1", "analytics_sales"));

    let current = state.active();
    assert!(current.config.compact_format);
    assert!(!current.policy.access.is_dataset_allowed("proj1", "analytics_sales"));
    assert_eq!(current.config.projects.len(), current.policy.access.projects().len());
}

#[tokio::test]
async fn test_health_check_reports_backend() {
    let (state, _) = setup();
    let result = handlers::health_check(&state).await.unwrap();

    assert_eq!(result["status"], "healthy");
    assert_eq!(result["server"]["backend"], "fake");
    assert_eq!(result["checks"]["bigquery_access"]["status"], "ok");
}

#[tokio::test]
async fn test_failed_reload_keeps_current_rules() {
    let (state, _) = setup();
    let mut bad = config_with(&["proj1:reporting"], true);
    bad.limits.default_row_limit = 500;
    bad.limits.max_row_limit = 100;

    assert!(state.reload(bad).is_err());
    assert!(!state.active().config.compact_format);
    assert!(state
        .active()
        .policy
        .access
        .is_dataset_allowed("proj1", "analytics_sales"));
}

#[tokio::test]
async fn test_switching_project_clears_last_dataset() {
    let (state, _) = setup();
    state.record_access("proj1", Some("reporting")).await;
    state.record_access("public", None).await;

    let last = state.last_access().await;
    assert_eq!(last.project.as_deref(), Some("public"));
    assert_eq!(last.dataset, None);
}
