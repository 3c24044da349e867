//! Error types for MCP operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
///
/// Tool-level failures reported by a server are never represented here; they
/// arrive as a [`CallToolResult`](crate::protocol::CallToolResult) with
/// `is_error` set.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the MCP server process.
    #[error("failed to spawn MCP server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frame or unexpected protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response line carried a different id than the request just sent.
    #[error("protocol error: response id {actual} does not match request id {expected}")]
    IdMismatch {
        /// Id of the request that was written.
        expected: u64,
        /// Id found in the line read back.
        actual: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned a JSON-RPC error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Operation requires a completed handshake.
    #[error("server not initialized - call initialize() first")]
    NotInitialized,

    /// The peer closed its output stream or the transport was stopped.
    #[error("connection closed")]
    ConnectionClosed,

    /// An exchange did not complete before its deadline.
    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout {
        /// The operation that timed out (`initialize`, `tools/list`, ...).
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// No running server advertises the tool.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// No server with this name is configured.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Attempted to start a server that is already running.
    #[error("server already running: {0}")]
    AlreadyRunning(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error leaves the owning transport suspect.
    ///
    /// These are the errors that make a client a candidate for close and
    /// restart under the auto-restart policy.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_)
                | Self::Transport(_)
                | Self::Protocol(_)
                | Self::IdMismatch { .. }
                | Self::Io(_)
                | Self::Json(_)
                | Self::ConnectionClosed
                | Self::Timeout { .. }
        )
    }
}
