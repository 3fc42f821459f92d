//! BigQuery MCP Library
//!
//! Read-only BigQuery access for agents. Every project, dataset and query
//! passes the `query-gate` policy before the REST API is called.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bigquery_mcp::{config, BigQueryMcpServer, RestBackend, ServerState};
//!
//! let config = config::load(&cli)?;
//! let backend = Arc::new(RestBackend::new(config.service_account_path.clone())?);
//! let server = BigQueryMcpServer::new(Arc::new(ServerState::new(config, backend)?));
//! ```

pub mod analysis;
pub mod backend;
pub mod cli;
pub mod config;
pub mod format;
pub mod handlers;
pub mod params;
pub mod response;
pub mod rest;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod types;

pub use backend::BigQueryBackend;
pub use cli::Cli;
pub use config::{Config, ConfigError};
pub use rest::RestBackend;
pub use server::BigQueryMcpServer;
pub use state::ServerState;
pub use types::BqError;

// Re-export parameter types for direct API usage
pub use params::*;
