//! Command-line arguments
//!
//! Every option here is the top configuration layer. Anything left unset
//! falls through to the config file, then the environment, then defaults.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "bigquery-mcp")]
#[command(version)]
#[command(about = "Read-only BigQuery MCP server with project/dataset allow-lists")]
pub struct Cli {
    /// Allowed datasets as PROJECT:PATTERN (repeatable, e.g. my-proj:prod_* my-proj:reporting)
    #[arg(value_name = "PROJECT:PATTERN")]
    pub projects: Vec<String>,

    /// Config file (.yaml, .yml or .toml)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Project billed for queries (default: first configured project)
    #[arg(long)]
    pub billing_project: Option<String>,

    /// BigQuery location, e.g. EU or US
    #[arg(long)]
    pub location: Option<String>,

    /// Maximum query timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// LIMIT injected into queries that have none
    #[arg(long)]
    pub default_limit: Option<u64>,

    /// Largest LIMIT a query may use
    #[arg(long)]
    pub max_limit: Option<u64>,

    /// Maximum bytes a query may bill
    #[arg(long, value_name = "BYTES")]
    pub max_bytes_processed: Option<u64>,

    /// Compact responses (smaller schemas and metadata)
    #[arg(long)]
    pub compact: bool,

    /// Only allow SELECT / WITH statements
    #[arg(long, value_name = "BOOL")]
    pub select_only: Option<bool>,

    /// Reject queries without an explicit LIMIT instead of injecting one
    #[arg(long)]
    pub require_explicit_limits: bool,

    /// Comma-separated keywords to reject (replaces the default list)
    #[arg(long, value_delimiter = ',', value_name = "KEYWORDS")]
    pub banned_keywords: Option<Vec<String>>,

    /// Log level for this server (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Do not log query text
    #[arg(long)]
    pub no_log_queries: bool,

    /// Log result row counts at debug level
    #[arg(long)]
    pub log_results: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub check_config: bool,
}

/// A boolean flag only counts as a setting when it was given
pub(crate) fn flag(set: bool, value: bool) -> Option<bool> {
    set.then_some(value)
}
