//! Error types for the backend crate.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the backend error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for inference backend operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The backend process could not be started.
    #[error("failed to start backend: {0}")]
    Spawn(String),

    /// The backend process exited unsuccessfully.
    #[error("backend exited with {status}: {stderr}")]
    Process {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The backend produced output that could not be interpreted.
    #[error("invalid backend output: {0}")]
    InvalidOutput(String),

    /// The backend did not answer in time.
    #[error("backend timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// IO error talking to the backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Create a spawn error.
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create an invalid output error.
    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    /// Build a process error from an exit status and captured stderr.
    pub fn process(status: ExitStatus, stderr: impl AsRef<str>) -> Self {
        let stderr = stderr.as_ref().trim();
        Self::Process {
            status: status.to_string(),
            stderr: if stderr.is_empty() {
                "no error output".to_string()
            } else {
                stderr.to_string()
            },
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
