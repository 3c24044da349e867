//! Error types for the agent crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// MCP runtime error (routing, transport, timeout).
    #[error("MCP error: {0}")]
    Mcp(#[from] toolgate_mcp::McpError),

    /// Inference backend error.
    #[error("Backend error: {0}")]
    Llm(#[from] toolgate_llm::LlmError),

    /// Tool arguments were not a JSON value.
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The backend did not answer in time.
    #[error("Backend timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl AgentError {
    /// Create an invalid-arguments error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Whether the error is a deadline miss, from either side.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Mcp(e) => e.is_timeout(),
            Self::Llm(e) => e.is_timeout(),
            Self::InvalidArguments(_) => false,
        }
    }

    /// Whether the error means the requested tool is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Mcp(toolgate_mcp::McpError::ToolNotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_mcp::McpError;

    #[test]
    fn test_error_display() {
        let err = AgentError::invalid_arguments("expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Invalid tool arguments: expected value at line 1"
        );

        let err = AgentError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Backend timed out after 30s");
    }

    #[test]
    fn test_classification() {
        let err: AgentError = McpError::ToolNotFound("nope".to_string()).into();
        assert!(err.is_not_found());
        assert!(!err.is_timeout());

        let err: AgentError = McpError::timeout("tools/call", Duration::from_secs(1)).into();
        assert!(err.is_timeout());
        assert!(!err.is_not_found());
    }
}
