//! Rejection taxonomy and policy construction errors

use std::fmt;

use thiserror::Error;

/// Why a request was refused by the gate.
///
/// Every rejection is local and deterministic: the same input against the
/// same policy snapshot always yields the same rejection. Messages carry the
/// offending identifier or token, never the full query text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Project '{project}' not in allowed list. Allowed projects: {}", join_or_none(.allowed))]
    ProjectAccess {
        project: String,
        allowed: Vec<String>,
    },

    #[error("Dataset '{dataset}' not allowed in project '{project}'. Allowed patterns: {}", join_or_none(.patterns))]
    DatasetAccess {
        project: String,
        dataset: String,
        patterns: Vec<String>,
    },

    #[error("{reason}")]
    SqlValidation { reason: String },

    #[error("Forbidden SQL operation: {keyword} (read-only server)")]
    Security { keyword: String },
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

impl Rejection {
    pub(crate) fn sql(reason: impl Into<String>) -> Self {
        Rejection::SqlValidation {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::ProjectAccess { .. } => RejectionKind::ProjectAccess,
            Rejection::DatasetAccess { .. } => RejectionKind::DatasetAccess,
            Rejection::SqlValidation { .. } => RejectionKind::SqlValidation,
            Rejection::Security { .. } => RejectionKind::Security,
        }
    }

    /// Actionable next step for the calling agent
    pub fn suggested_action(&self) -> String {
        match self {
            Rejection::ProjectAccess { .. } => {
                "Use list_projects() to see available projects.".to_string()
            }
            Rejection::DatasetAccess { project, .. } => format!(
                "Use list_datasets(project='{}') to see accessible datasets.",
                project
            ),
            Rejection::SqlValidation { .. } => {
                "Submit a single read-only SELECT (or WITH ... SELECT) statement with a positive LIMIT."
                    .to_string()
            }
            Rejection::Security { .. } => {
                "This server is read-only. Remove data-modifying or administrative statements."
                    .to_string()
            }
        }
    }
}

/// Coarse rejection category, surfaced to callers as `error_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    ProjectAccess,
    DatasetAccess,
    SqlValidation,
    Security,
}

impl RejectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionKind::ProjectAccess => "ProjectAccessError",
            RejectionKind::DatasetAccess => "DatasetAccessError",
            RejectionKind::SqlValidation => "SQLValidationError",
            RejectionKind::Security => "SecurityError",
        }
    }

    pub fn error_code(self) -> &'static str {
        match self {
            RejectionKind::ProjectAccess => "PROJECT_ACCESS_DENIED",
            RejectionKind::DatasetAccess => "DATASET_ACCESS_DENIED",
            RejectionKind::SqlValidation => "SQL_VALIDATION_FAILED",
            RejectionKind::Security => "SECURITY_VIOLATION",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid policy construction input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("project id must not be empty")]
    EmptyProjectId,

    #[error("project '{0}' is configured more than once")]
    DuplicateProject(String),

    #[error("row limits must be positive (default_row_limit={default}, max_row_limit={max})")]
    NonPositiveLimit { default: u64, max: u64 },

    #[error("default_row_limit ({default}) exceeds max_row_limit ({max})")]
    DefaultExceedsMax { default: u64, max: u64 },

    #[error("banned keyword '{0}' is not a single SQL word")]
    InvalidKeyword(String),
}
