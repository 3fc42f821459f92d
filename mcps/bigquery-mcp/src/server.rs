//! MCP server exposing read-only BigQuery tools
//!
//! Each tool delegates to its handler in the handlers module and renders the
//! outcome through `response::respond`.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::config::{Config, ConfigError};
use crate::handlers;
use crate::params::*;
use crate::response::respond;
use crate::state::ServerState;

/// The BigQuery MCP Server
#[derive(Clone)]
pub struct BigQueryMcpServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Tool Router - Each tool delegates to its handler
// ============================================================================

#[tool_router]
impl BigQueryMcpServer {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Swap in a new configuration; the old one stays on error
    pub fn reload(&self, config: Config) -> Result<(), ConfigError> {
        self.state.reload(config)
    }

    #[tool(description = "List the BigQuery projects this server may access and their dataset patterns")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        respond(handlers::list_projects(&self.state).await)
    }

    #[tool(description = "List datasets in a project, filtered to the allowed dataset patterns")]
    async fn list_datasets(
        &self,
        Parameters(params): Parameters<ListDatasetsParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::list_datasets(&self.state, params).await)
    }

    #[tool(description = "List tables and views in an allowed dataset")]
    async fn list_tables(
        &self,
        Parameters(params): Parameters<ListTablesParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::list_tables(&self.state, params).await)
    }

    #[tool(description = "Get a table's schema, size, partitioning and clustering")]
    async fn get_table_info(
        &self,
        Parameters(params): Parameters<TablePathParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::get_table_info(&self.state, params).await)
    }

    #[tool(description = "Sample a table and summarize each column (nulls, distinct values, examples)")]
    async fn analyze_table(
        &self,
        Parameters(params): Parameters<AnalyzeTableParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::analyze_table(&self.state, params).await)
    }

    #[tool(description = "Profile columns with statistics, top values and a semantic classification")]
    async fn analyze_columns(
        &self,
        Parameters(params): Parameters<AnalyzeColumnsParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::analyze_columns(&self.state, params).await)
    }

    #[tool(
        description = "Run a read-only GoogleSQL query. A LIMIT is added or clamped; use dry_run to estimate cost first"
    )]
    async fn execute_query(
        &self,
        Parameters(params): Parameters<ExecuteQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::execute_query(&self.state, params).await)
    }

    #[tool(description = "Check a query against the safety and access rules without running it")]
    async fn validate_query(
        &self,
        Parameters(params): Parameters<ValidateQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(handlers::validate_query(&self.state, params).await)
    }

    #[tool(description = "Show the billing project, limits and the last project/dataset accessed")]
    async fn get_current_context(&self) -> Result<CallToolResult, McpError> {
        respond(handlers::get_current_context(&self.state).await)
    }

    #[tool(description = "Check BigQuery connectivity and report server status")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        respond(handlers::health_check(&self.state).await)
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for BigQueryMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Read-only BigQuery MCP server. Only allow-listed projects and datasets \
                 are visible. Queries must be a single SELECT/WITH statement; a row LIMIT \
                 is enforced. Use validate_query or execute_query with dry_run to check \
                 cost before running large queries."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
