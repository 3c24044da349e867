//! CLI command handlers.

pub mod call;
pub mod serve;
pub mod tools;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use toolgate_mcp::{McpManager, StartSummary};

/// Overall budget for starting every configured MCP server.
pub const MCP_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Explicit MCP configuration file.
    pub mcp_config: Option<PathBuf>,
}

impl Context {
    /// Build a manager from `--mcp-config`, or from the discovered file.
    pub fn mcp_manager(&self) -> Result<McpManager> {
        let manager = McpManager::new();
        match &self.mcp_config {
            Some(path) => manager
                .load_config_file(path)
                .with_context(|| format!("failed to load MCP config {}", path.display()))?,
            None => {
                manager
                    .load_config_from_env()
                    .context("failed to load MCP config")?;
            }
        }
        Ok(manager)
    }
}

/// Start every enabled server within [`MCP_STARTUP_TIMEOUT`].
///
/// Failures are logged and reported in the summary; running out of time
/// leaves whatever started so far.
pub async fn start_mcp(manager: &McpManager) -> StartSummary {
    match tokio::time::timeout(MCP_STARTUP_TIMEOUT, manager.start_all()).await {
        Ok(summary) => {
            for (server, error) in &summary.failed {
                tracing::warn!(server = %server, error = %error, "MCP server unavailable");
            }
            summary
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = MCP_STARTUP_TIMEOUT.as_secs(),
                running = manager.client_count(),
                "MCP startup timed out, continuing with the servers that are up"
            );
            StartSummary {
                started: manager.connected_servers(),
                failed: Vec::new(),
            }
        }
    }
}

/// Stop every MCP server, logging failures.
pub async fn stop_mcp(manager: &McpManager) {
    if let Err(e) = manager.stop_all().await {
        tracing::warn!(error = %e, "Error stopping MCP servers");
    }
}

/// Truncate a string for table display.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
