//! Layered configuration
//!
//! Sources, highest first: command line, config file, environment, defaults.
//! Each option resolves on its own from the highest layer that sets it. The
//! project list and the banned keyword list are taken whole from one layer.
//!
//! The config file is searched in order when `--config` is not given:
//! 1. `BIGQUERY_MCP_CONFIG` env var
//! 2. `./config/config.yaml`
//! 3. `./config.yaml`
//! 4. `$XDG_CONFIG_HOME/bigquery-mcp/config.yaml`
//!
//! Running without any file is fine as long as some layer names a project.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use query_gate::{
    AccessPattern, AccessPolicy, PolicyError, PolicySnapshot, ProjectEntry, SecurityPolicy,
    DEFAULT_BANNED_KEYWORDS, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::{flag, Cli};

pub const DEFAULT_LOCATION: &str = "EU";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_BYTES_PROCESSED: u64 = 1_073_741_824;
pub const DEFAULT_SERVER_NAME: &str = "BigQuery MCP Server";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const BOOL: &str = "true or false";
const INTEGER: &str = "a non-negative integer";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format for {0} (use .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid project spec '{0}': expected PROJECT:DATASET_PATTERN")]
    InvalidProjectSpec(String),

    #[error(
        "no projects configured; pass PROJECT:PATTERN arguments, set BIGQUERY_PROJECTS, \
         or add a projects section to the config file"
    )]
    NoProjects,

    #[error("project '{0}' has no dataset patterns")]
    NoDatasetPatterns(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

// ============================================================================
// Config file schema
// ============================================================================

/// One allowed project with its dataset patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSpec {
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    name: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BigQuerySection {
    billing_project: Option<String>,
    location: Option<String>,
    service_account_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SecuritySection {
    banned_sql_keywords: Option<Vec<String>>,
    select_only: Option<bool>,
    require_explicit_limits: Option<bool>,
    check_table_references: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LimitsSection {
    #[serde(alias = "default_limit")]
    default_row_limit: Option<u64>,
    #[serde(alias = "max_limit")]
    max_row_limit: Option<u64>,
    max_query_timeout: Option<u64>,
    max_bytes_processed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FormattingSection {
    compact_format: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingSection {
    log_level: Option<String>,
    log_queries: Option<bool>,
    log_results: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    server: ServerSection,
    bigquery: BigQuerySection,
    projects: Option<Vec<ProjectSpec>>,
    security: SecuritySection,
    limits: LimitsSection,
    formatting: FormattingSection,
    logging: LoggingSection,
}

// ============================================================================
// Layers
// ============================================================================

/// One configuration layer; `None` falls through to the next layer
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub billing_project: Option<String>,
    pub location: Option<String>,
    pub service_account_path: Option<String>,
    pub projects: Option<Vec<ProjectSpec>>,
    pub banned_keywords: Option<Vec<String>>,
    pub select_only: Option<bool>,
    pub require_explicit_limits: Option<bool>,
    pub check_table_references: Option<bool>,
    pub default_row_limit: Option<u64>,
    pub max_row_limit: Option<u64>,
    pub max_query_timeout: Option<u64>,
    pub max_bytes_processed: Option<u64>,
    pub compact_format: Option<bool>,
    pub log_level: Option<String>,
    pub log_queries: Option<bool>,
    pub log_results: Option<bool>,
}

impl Settings {
    /// Field-wise fallback: keep what `self` sets, take the rest from `lower`
    pub fn or(self, lower: Settings) -> Settings {
        Settings {
            server_name: self.server_name.or(lower.server_name),
            server_version: self.server_version.or(lower.server_version),
            billing_project: self.billing_project.or(lower.billing_project),
            location: self.location.or(lower.location),
            service_account_path: self.service_account_path.or(lower.service_account_path),
            projects: self.projects.or(lower.projects),
            banned_keywords: self.banned_keywords.or(lower.banned_keywords),
            select_only: self.select_only.or(lower.select_only),
            require_explicit_limits: self.require_explicit_limits.or(lower.require_explicit_limits),
            check_table_references: self.check_table_references.or(lower.check_table_references),
            default_row_limit: self.default_row_limit.or(lower.default_row_limit),
            max_row_limit: self.max_row_limit.or(lower.max_row_limit),
            max_query_timeout: self.max_query_timeout.or(lower.max_query_timeout),
            max_bytes_processed: self.max_bytes_processed.or(lower.max_bytes_processed),
            compact_format: self.compact_format.or(lower.compact_format),
            log_level: self.log_level.or(lower.log_level),
            log_queries: self.log_queries.or(lower.log_queries),
            log_results: self.log_results.or(lower.log_results),
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Settings, ConfigError> {
        let projects = if cli.projects.is_empty() {
            None
        } else {
            Some(parse_project_specs(
                cli.projects.iter().map(String::as_str),
                "configured via command line",
            )?)
        };

        Ok(Settings {
            billing_project: cli.billing_project.clone(),
            location: cli.location.clone(),
            projects,
            banned_keywords: cli.banned_keywords.clone(),
            select_only: cli.select_only,
            require_explicit_limits: flag(cli.require_explicit_limits, true),
            default_row_limit: cli.default_limit,
            max_row_limit: cli.max_limit,
            max_query_timeout: cli.timeout,
            max_bytes_processed: cli.max_bytes_processed,
            compact_format: flag(cli.compact, true),
            log_level: cli.log_level.clone(),
            log_queries: flag(cli.no_log_queries, false),
            log_results: flag(cli.log_results, true),
            ..Settings::default()
        })
    }

    /// Read the environment layer; malformed values are errors
    pub fn from_env(env: &HashMap<String, String>) -> Result<Settings, ConfigError> {
        let get = |key: &str| {
            env.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let projects = match get("BIGQUERY_PROJECTS") {
            Some(raw) => Some(parse_project_specs(
                raw.split(','),
                "configured via environment",
            )?),
            None => None,
        };

        Ok(Settings {
            billing_project: get("BIGQUERY_BILLING_PROJECT"),
            location: get("BIGQUERY_LOCATION"),
            service_account_path: get("GOOGLE_APPLICATION_CREDENTIALS"),
            projects,
            banned_keywords: get("BIGQUERY_BANNED_KEYWORDS").map(|raw| split_list(&raw)),
            select_only: parse_env(get("BIGQUERY_SELECT_ONLY"), "BIGQUERY_SELECT_ONLY", BOOL, parse_bool)?,
            require_explicit_limits: parse_env(
                get("BIGQUERY_REQUIRE_EXPLICIT_LIMITS"),
                "BIGQUERY_REQUIRE_EXPLICIT_LIMITS",
                BOOL,
                parse_bool,
            )?,
            default_row_limit: parse_env(
                get("BIGQUERY_DEFAULT_ROW_LIMIT"),
                "BIGQUERY_DEFAULT_ROW_LIMIT",
                INTEGER,
                parse_u64,
            )?,
            max_row_limit: parse_env(
                get("BIGQUERY_MAX_ROW_LIMIT"),
                "BIGQUERY_MAX_ROW_LIMIT",
                INTEGER,
                parse_u64,
            )?,
            max_query_timeout: parse_env(
                get("BIGQUERY_QUERY_TIMEOUT"),
                "BIGQUERY_QUERY_TIMEOUT",
                INTEGER,
                parse_u64,
            )?,
            max_bytes_processed: parse_env(
                get("BIGQUERY_MAX_BYTES_PROCESSED"),
                "BIGQUERY_MAX_BYTES_PROCESSED",
                INTEGER,
                parse_u64,
            )?,
            compact_format: parse_env(get("COMPACT_FORMAT"), "COMPACT_FORMAT", BOOL, parse_bool)?,
            log_level: get("LOG_LEVEL"),
            log_queries: parse_env(get("LOG_QUERIES"), "LOG_QUERIES", BOOL, parse_bool)?,
            log_results: parse_env(get("LOG_RESULTS"), "LOG_RESULTS", BOOL, parse_bool)?,
            ..Settings::default()
        })
    }

    /// Parse a YAML or TOML config file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Settings, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let file: FileConfig = if content.trim().is_empty() {
            FileConfig::default()
        } else {
            match extension.as_deref() {
                Some("yaml") | Some("yml") => {
                    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?
                }
                Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?,
                _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
            }
        };

        Ok(Settings {
            server_name: file.server.name,
            server_version: file.server.version,
            billing_project: file.bigquery.billing_project.filter(|s| !s.is_empty()),
            location: file.bigquery.location.filter(|s| !s.is_empty()),
            service_account_path: file.bigquery.service_account_path.filter(|s| !s.is_empty()),
            projects: file.projects,
            banned_keywords: file.security.banned_sql_keywords,
            select_only: file.security.select_only,
            require_explicit_limits: file.security.require_explicit_limits,
            check_table_references: file.security.check_table_references,
            default_row_limit: file.limits.default_row_limit,
            max_row_limit: file.limits.max_row_limit,
            max_query_timeout: file.limits.max_query_timeout,
            max_bytes_processed: file.limits.max_bytes_processed,
            compact_format: file.formatting.compact_format,
            log_level: file.logging.log_level,
            log_queries: file.logging.log_queries,
            log_results: file.logging.log_results,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u64(raw: &str) -> Option<u64> {
    raw.parse().ok()
}

fn parse_env<T>(
    raw: Option<String>,
    key: &'static str,
    expected: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match parse(&raw) {
        Some(value) => Ok(Some(value)),
        None => Err(ConfigError::InvalidValue {
            key,
            value: raw,
            expected,
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `project:pattern` specs, grouping patterns per project in order of
/// first appearance. The split is on the first `:`.
pub fn parse_project_specs<'a>(
    specs: impl IntoIterator<Item = &'a str>,
    description: &str,
) -> Result<Vec<ProjectSpec>, ConfigError> {
    let mut projects: Vec<ProjectSpec> = Vec::new();

    for spec in specs.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
        let (project, pattern) = spec
            .split_once(':')
            .map(|(p, d)| (p.trim(), d.trim()))
            .filter(|(p, d)| !p.is_empty() && !d.is_empty())
            .ok_or_else(|| ConfigError::InvalidProjectSpec(spec.to_string()))?;

        match projects.iter_mut().find(|p| p.project_id == project) {
            Some(existing) => {
                if !existing.datasets.iter().any(|d| d == pattern) {
                    existing.datasets.push(pattern.to_string());
                }
            }
            None => projects.push(ProjectSpec {
                project_id: project.to_string(),
                project_name: None,
                description: Some(format!("Project {} ({})", project, description)),
                datasets: vec![pattern.to_string()],
            }),
        }
    }

    Ok(projects)
}

// ============================================================================
// Resolved configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecuritySettings {
    pub banned_keywords: Vec<String>,
    pub select_only: bool,
    pub require_explicit_limits: bool,
    pub check_table_references: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limits {
    pub default_row_limit: u64,
    pub max_row_limit: u64,
    /// Seconds
    pub max_query_timeout: u64,
    pub max_bytes_processed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingSettings {
    pub log_level: String,
    pub log_queries: bool,
    pub log_results: bool,
}

/// Fully resolved, validated configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Config file that contributed, if any
    pub source: Option<PathBuf>,
    pub server_name: String,
    pub server_version: String,
    pub billing_project: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_path: Option<String>,
    pub projects: Vec<ProjectSpec>,
    pub security: SecuritySettings,
    pub limits: Limits,
    pub compact_format: bool,
    pub logging: LoggingSettings,
}

impl Config {
    /// Apply defaults and validate a merged layer stack
    pub fn from_settings(settings: Settings, source: Option<PathBuf>) -> Result<Config, ConfigError> {
        let projects = settings.projects.unwrap_or_default();
        if projects.is_empty() {
            return Err(ConfigError::NoProjects);
        }
        let projects = projects
            .into_iter()
            .map(|mut p| {
                p.project_id = p.project_id.trim().to_string();
                p.datasets.retain(|d| !d.trim().is_empty());
                p
            })
            .collect::<Vec<_>>();
        for project in &projects {
            if project.project_id.is_empty() {
                return Err(PolicyError::EmptyProjectId.into());
            }
            if project.datasets.is_empty() {
                return Err(ConfigError::NoDatasetPatterns(project.project_id.clone()));
            }
        }

        let billing_project = match settings.billing_project.filter(|b| !b.trim().is_empty()) {
            Some(billing) => billing.trim().to_string(),
            None => {
                let first = projects[0].project_id.clone();
                tracing::info!(billing_project = %first, "No billing project set; using the first configured project");
                first
            }
        };

        let log_level = match settings.log_level {
            Some(level) => normalize_log_level(&level)?,
            None => "info".to_string(),
        };

        let max_query_timeout = settings.max_query_timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);
        if max_query_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_query_timeout",
                value: "0".to_string(),
                expected: "a positive number of seconds",
            });
        }
        let max_bytes_processed = settings
            .max_bytes_processed
            .unwrap_or(DEFAULT_MAX_BYTES_PROCESSED);
        if max_bytes_processed == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_bytes_processed",
                value: "0".to_string(),
                expected: "a positive number of bytes",
            });
        }

        let banned_keywords = settings
            .banned_keywords
            .unwrap_or_else(|| DEFAULT_BANNED_KEYWORDS.iter().map(|k| k.to_string()).collect())
            .into_iter()
            .map(|k| k.trim().to_ascii_uppercase())
            .collect();

        let config = Config {
            source,
            server_name: settings
                .server_name
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            server_version: settings
                .server_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            billing_project,
            location: settings
                .location
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            service_account_path: settings.service_account_path,
            projects,
            security: SecuritySettings {
                banned_keywords,
                select_only: settings.select_only.unwrap_or(true),
                require_explicit_limits: settings.require_explicit_limits.unwrap_or(false),
                check_table_references: settings.check_table_references.unwrap_or(true),
            },
            limits: Limits {
                default_row_limit: settings.default_row_limit.unwrap_or(DEFAULT_ROW_LIMIT),
                max_row_limit: settings.max_row_limit.unwrap_or(MAX_ROW_LIMIT),
                max_query_timeout,
                max_bytes_processed,
            },
            compact_format: settings.compact_format.unwrap_or(false),
            logging: LoggingSettings {
                log_level,
                log_queries: settings.log_queries.unwrap_or(true),
                log_results: settings.log_results.unwrap_or(false),
            },
        };

        // Fails on duplicate projects, bad limits and malformed keywords
        config.to_snapshot()?;
        Ok(config)
    }

    /// Build the gate policies this configuration describes
    pub fn to_snapshot(&self) -> Result<PolicySnapshot, ConfigError> {
        let entries = self
            .projects
            .iter()
            .map(|p| {
                let patterns: Vec<AccessPattern> =
                    p.datasets.iter().map(|d| AccessPattern::new(d.trim())).collect();
                let mut entry = ProjectEntry::new(p.project_id.clone(), patterns);
                if let Some(name) = p.project_name.as_ref().filter(|n| !n.is_empty()) {
                    entry = entry.with_name(name.clone());
                }
                if let Some(description) = &p.description {
                    entry = entry.with_description(description.clone());
                }
                entry
            })
            .collect();

        let access = AccessPolicy::new(self.billing_project.clone(), entries)?;
        let security = SecurityPolicy::new(
            &self.security.banned_keywords,
            self.limits.default_row_limit,
            self.limits.max_row_limit,
        )?
        .with_select_only(self.security.select_only)
        .with_require_explicit_limit(self.security.require_explicit_limits)
        .with_table_reference_check(self.security.check_table_references);

        Ok(PolicySnapshot::new(access, security))
    }

    /// Log where configuration came from and the settings that matter
    pub fn log_summary(&self) {
        tracing::info!("Configuration precedence: CLI > config file > environment > defaults");
        match &self.source {
            Some(path) => tracing::info!("Config file: {}", path.display()),
            None => tracing::info!("No config file; using command line, environment and defaults"),
        }
        for project in &self.projects {
            tracing::info!(
                project = %project.project_id,
                datasets = ?project.datasets,
                "Allowed project"
            );
        }
        tracing::info!(
            billing_project = %self.billing_project,
            location = %self.location,
            select_only = self.security.select_only,
            require_explicit_limits = self.security.require_explicit_limits,
            default_row_limit = self.limits.default_row_limit,
            max_row_limit = self.limits.max_row_limit,
            timeout_secs = self.limits.max_query_timeout,
            compact = self.compact_format,
            "Resolved configuration"
        );
    }
}

fn normalize_log_level(level: &str) -> Result<String, ConfigError> {
    let lower = level.trim().to_ascii_lowercase();
    let lower = if lower == "warning" { "warn".to_string() } else { lower };
    if LOG_LEVELS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(ConfigError::InvalidValue {
            key: "log_level",
            value: level.to_string(),
            expected: "one of trace, debug, info, warn, error",
        })
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Standard config file locations, in search order
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("config").join("config.yaml"),
        PathBuf::from("config.yaml"),
    ];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("bigquery-mcp").join("config.yaml"));
    }
    paths
}

/// Pick the config file: explicit path, env var, then the search list
fn discover(
    cli: &Cli,
    env: &HashMap<String, String>,
    search_paths: &[PathBuf],
) -> Result<Option<PathBuf>, ConfigError> {
    let explicit = cli.config.clone().or_else(|| {
        env.get("BIGQUERY_MCP_CONFIG")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    });

    if let Some(path) = explicit {
        return if path.exists() {
            Ok(Some(path))
        } else {
            Err(ConfigError::NotFound(path))
        };
    }

    Ok(search_paths.iter().find(|p| p.exists()).cloned())
}

/// Resolve configuration from the process arguments and environment
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    load_from(cli, &env, &default_search_paths())
}

/// Resolve configuration from explicit sources
pub fn load_from(
    cli: &Cli,
    env: &HashMap<String, String>,
    search_paths: &[PathBuf],
) -> Result<Config, ConfigError> {
    let source = discover(cli, env, search_paths)?;

    let file = match &source {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    let merged = Settings::from_cli(cli)?
        .or(file)
        .or(Settings::from_env(env)?);

    Config::from_settings(merged, source)
}
