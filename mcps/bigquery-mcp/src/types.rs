//! Error types for the BigQuery MCP server

use query_gate::Rejection;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Refined failure code for query execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionCode {
    PermissionDenied,
    ResourceNotFound,
    SyntaxError,
    ArrayNullElement,
    Unknown,
}

impl ExecutionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionCode::PermissionDenied => "PERMISSION_DENIED",
            ExecutionCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ExecutionCode::SyntaxError => "SYNTAX_ERROR",
            ExecutionCode::ArrayNullElement => "ARRAY_NULL_ELEMENT",
            ExecutionCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Error, Debug)]
pub enum BqError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Invalid table path: '{0}'. Expected 'dataset.table' or 'project.dataset.table'")]
    InvalidTablePath(String),

    #[error("Invalid dataset path: '{0}'. Expected 'dataset' or 'project.dataset'")]
    InvalidDatasetPath(String),

    #[error("Table '{table}' not found in dataset '{project}.{dataset}'")]
    TableNotFound {
        project: String,
        dataset: String,
        table: String,
    },

    #[error("Columns not found in table: {}", .0.join(", "))]
    UnknownColumns(Vec<String>),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Query timeout: {0}")]
    Timeout(String),

    #[error("BigQuery quota exceeded: {0}")]
    ResourceLimit(String),

    #[error("{message}")]
    Execution { code: ExecutionCode, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not format results: {0}")]
    Format(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BqError {
    /// Category name reported to the agent as `error_type`
    pub fn error_type(&self) -> &'static str {
        match self {
            BqError::Rejected(rejection) => rejection.kind().as_str(),
            BqError::InvalidTablePath(_) | BqError::InvalidDatasetPath(_) => "InvalidTablePathError",
            BqError::TableNotFound { .. } => "TableNotFoundError",
            BqError::UnknownColumns(_) | BqError::InvalidArgument(_) => "InvalidArgumentError",
            BqError::Authentication(_) => "AuthenticationError",
            BqError::Timeout(_) => "QueryTimeoutError",
            BqError::ResourceLimit(_) => "ResourceLimitError",
            BqError::Execution { .. } | BqError::Http(_) | BqError::Format(_) => {
                "QueryExecutionError"
            }
            BqError::Configuration(_) => "ConfigurationError",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            BqError::Rejected(rejection) => rejection.kind().error_code(),
            BqError::InvalidTablePath(_) | BqError::InvalidDatasetPath(_) => "INVALID_TABLE_PATH",
            BqError::TableNotFound { .. } => "TABLE_NOT_FOUND",
            BqError::UnknownColumns(_) | BqError::InvalidArgument(_) => "INVALID_ARGUMENT",
            BqError::Authentication(_) => "AUTH_FAILED",
            BqError::Timeout(_) => "QUERY_TIMEOUT",
            BqError::ResourceLimit(_) => "RESOURCE_LIMIT_EXCEEDED",
            BqError::Execution { code, .. } => code.as_str(),
            BqError::Http(_) => "QUERY_EXECUTION_FAILED",
            BqError::Format(_) => "FORMAT_ERROR",
            BqError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Actionable next step for the calling agent
    pub fn suggested_action(&self) -> Option<String> {
        let action = match self {
            BqError::Rejected(rejection) => return Some(rejection.suggested_action()),
            BqError::InvalidTablePath(_) => {
                "Use 'dataset.table' or 'project.dataset.table'. Use list_tables() to find table names."
            }
            BqError::InvalidDatasetPath(_) => {
                "Use 'dataset' or 'project.dataset'. Use list_datasets() to find dataset names."
            }
            BqError::TableNotFound { .. } => {
                "Verify the table name with list_tables(dataset_path=...)."
            }
            BqError::UnknownColumns(_) => "Use get_table_info() to see the table's columns.",
            BqError::InvalidArgument(_) => return None,
            BqError::Authentication(_) => {
                "Set BIGQUERY_ACCESS_TOKEN or run 'gcloud auth application-default login'."
            }
            BqError::Timeout(_) => {
                "Try adding a LIMIT clause, filtering data, or increasing the timeout parameter. \
                 Consider breaking complex queries into smaller parts."
            }
            BqError::ResourceLimit(_) => {
                "Wait and retry later, or reduce the data scanned (select fewer columns, filter on partitions)."
            }
            BqError::Execution { code, .. } => match code {
                ExecutionCode::PermissionDenied => {
                    "Ensure the credentials have bigquery.jobs.create permission and access to the referenced tables."
                }
                ExecutionCode::ResourceNotFound => {
                    "Verify the project ID, dataset name, and table name are correct."
                }
                ExecutionCode::SyntaxError => {
                    "Review your SQL syntax. Common issues: missing quotes, incorrect keywords, or malformed expressions."
                }
                ExecutionCode::ArrayNullElement => {
                    "Use COALESCE() to handle NULL values or filter them out before creating arrays."
                }
                ExecutionCode::Unknown => {
                    "Check the error details. If the issue persists, verify your query and data."
                }
            },
            BqError::Configuration(_) => "Check the server configuration and restart or reload it.",
            BqError::Http(_) => "Check network connectivity to bigquery.googleapis.com and retry.",
            BqError::Format(_) => "Retry with format='json'.",
        };
        Some(action.to_string())
    }
}

/// Classify a BigQuery API failure from its HTTP status and message
pub fn classify_api_error(status: u16, message: &str) -> BqError {
    let lower = message.to_lowercase();

    if status == 401 {
        return BqError::Authentication(message.to_string());
    }
    if lower.contains("quota") || lower.contains("rate limit") || lower.contains("ratelimitexceeded") {
        return BqError::ResourceLimit(message.to_string());
    }
    if lower.contains("bytes billed") {
        return BqError::ResourceLimit(message.to_string());
    }
    if status == 403 || lower.contains("permission denied") || lower.contains("access denied") {
        return BqError::Execution {
            code: ExecutionCode::PermissionDenied,
            message: format!("Permission denied: {}", message),
        };
    }
    if status == 404 || lower.contains("not found") {
        return BqError::Execution {
            code: ExecutionCode::ResourceNotFound,
            message: format!("Resource not found: {}", message),
        };
    }
    if lower.contains("syntax") {
        return BqError::Execution {
            code: ExecutionCode::SyntaxError,
            message: format!("SQL syntax error: {}", message),
        };
    }
    if lower.contains("array cannot have a null element") {
        return BqError::Execution {
            code: ExecutionCode::ArrayNullElement,
            message: format!("BigQuery array contains NULL values: {}", message),
        };
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return BqError::Timeout(message.to_string());
    }

    BqError::Execution {
        code: ExecutionCode::Unknown,
        message: format!("Query execution failed: {}", message),
    }
}
