//! Tool result helpers
//!
//! Successful tools return pretty-printed JSON. Failures become an error
//! envelope carried in an error tool result so the agent can read the
//! category and suggested next step instead of a protocol-level failure.

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use crate::types::BqError;

/// Error payload returned to the agent
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error: String,
    pub error_type: &'static str,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl From<&BqError> for ErrorEnvelope {
    fn from(err: &BqError) -> Self {
        Self {
            status: "error",
            error: err.to_string(),
            error_type: err.error_type(),
            error_code: err.error_code(),
            suggested_action: err.suggested_action(),
        }
    }
}

/// Create a successful JSON response from any serializable data
///
/// Handlers build a `serde_json::Value` (or any `Serialize` type) and this
/// renders it as a single pretty-printed text content item.
///
/// # Returns
///
/// * `Ok(CallToolResult)` with pretty-printed JSON content
/// * `Err(McpError)` if serialization fails
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Error tool result carrying the envelope for `err`
pub fn error_result(err: &BqError) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(&ErrorEnvelope::from(err))
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::error(vec![Content::text(json)]))
}

/// Render a handler outcome as a tool result
pub fn respond<T: Serialize>(outcome: Result<T, BqError>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(data) => json_success(&data),
        Err(err) => error_result(&err),
    }
}
