//! Error types for the server.
//!
//! Every error renders as an OpenAI-compatible body so existing clients can
//! surface it unchanged: `{"error":{"message","type","code"}}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use toolgate_agent::AgentError;
use toolgate_llm::LlmError;
use toolgate_mcp::McpError;
use toolgate_types::ErrorResponse;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed or semantically invalid request.
    #[error("{message}")]
    InvalidRequest {
        /// Machine-readable reason (`invalid_messages`, `invalid_json`, ...).
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request did not finish before its deadline.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The resource is in a conflicting state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The inference backend failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An MCP server failed.
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Service unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Create an invalid request error.
    pub fn invalid_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code,
            message: message.into(),
        }
    }

    /// HTTP status, OpenAI error type and error code.
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            Self::InvalidRequest { code, .. } => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", code)
            }
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "not_found"),
            Self::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, "timeout_error", "timeout"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "invalid_request_error", "conflict"),
            Self::Backend(_) => (StatusCode::BAD_GATEWAY, "api_error", "backend_error"),
            Self::Mcp(_) => (StatusCode::BAD_GATEWAY, "api_error", "mcp_error"),
            Self::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "api_error",
                "service_unavailable",
            ),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error", "internal_error"),
        }
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        self.parts().0
    }

    /// The OpenAI-shaped body for this error.
    pub fn to_body(&self) -> ErrorResponse {
        let (_, kind, code) = self.parts();
        ErrorResponse::new(kind, code, self.to_string())
    }
}

impl From<McpError> for ServerError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::ToolNotFound(_) | McpError::ServerNotFound(_) => {
                ServerError::NotFound(e.to_string())
            }
            McpError::AlreadyRunning(_) => ServerError::Conflict(e.to_string()),
            McpError::Timeout { .. } => ServerError::Timeout(e.to_string()),
            McpError::Config(_) => ServerError::invalid_request("invalid_server", e.to_string()),
            _ => ServerError::Mcp(e.to_string()),
        }
    }
}

impl From<LlmError> for ServerError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(_) => ServerError::Timeout(e.to_string()),
            _ => ServerError::Backend(e.to_string()),
        }
    }
}

impl From<AgentError> for ServerError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Mcp(e) => e.into(),
            AgentError::Llm(e) => e.into(),
            AgentError::InvalidArguments(_) => {
                ServerError::invalid_request("invalid_arguments", e.to_string())
            }
            AgentError::Timeout(_) => ServerError::Timeout(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.to_body();

        if status.is_server_error() {
            tracing::error!(status = %status, code = ?body.error.code, error = %body.error.message, "Server error");
        } else {
            tracing::warn!(status = %status, code = ?body.error.code, error = %body.error.message, "Client error");
        }

        (status, Json(body)).into_response()
    }
}
