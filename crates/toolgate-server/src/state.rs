//! Application state shared across handlers.

use std::sync::Arc;

use toolgate_agent::ToolOrchestrator;
use toolgate_llm::SharedBackend;
use toolgate_mcp::McpManager;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// The inference backend.
    pub backend: SharedBackend,

    /// MCP servers and the aggregate tool catalog. Empty when MCP is not
    /// configured.
    pub mcp: McpManager,

    /// Executes MCP tool calls found in backend answers.
    pub orchestrator: ToolOrchestrator,
}

impl AppState {
    /// Create a new application state.
    pub fn new(backend: SharedBackend, mcp: McpManager, config: ServerConfig) -> Self {
        let orchestrator = ToolOrchestrator::new(Arc::new(mcp.clone()), backend.clone())
            .with_request_timeout(config.request_timeout);
        Self {
            config: Arc::new(config),
            backend,
            mcp,
            orchestrator,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .field("mcp", &self.mcp)
            .finish()
    }
}
