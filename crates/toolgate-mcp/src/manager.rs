//! Multi-server lifecycle management and tool routing.
//!
//! The [`McpManager`] owns the loaded configuration and the live set of
//! clients, and presents one aggregate tool catalog plus one
//! [`call_tool`](McpManager::call_tool) entry point regardless of which
//! server owns a tool.
//!
//! # Lock discipline
//!
//! - The registry (clients, start order, catalog, collisions) sits behind a
//!   read/write lock. Writers hold it only to swap entries and rebuild the
//!   catalog, never across subprocess I/O, so catalog reads never wait on a
//!   starting server.
//! - Start, stop and restart are serialized by an async lifecycle mutex.
//!   Tool calls never take it.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolgate_mcp::{McpConfig, McpManager};
//!
//! let manager = McpManager::new();
//! manager.load_config_file("toolgate.yaml".as_ref())?;
//! let summary = manager.start_all().await;
//! println!("started {} servers", summary.started.len());
//!
//! let result = manager.call_tool("ping", serde_json::json!({})).await?;
//! println!("{}", result.text());
//!
//! manager.stop_all().await?;
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::client::{ClientState, McpClient};
use crate::config::{McpConfig, RuntimeSettings, ServerConfig};
use crate::env::expand_env;
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, McpTool, ServerInfo};
use crate::transport::TransportOptions;

/// First delay before a background restart.
const RESTART_BACKOFF_MIN: Duration = Duration::from_millis(200);

/// Ceiling for the background restart delay.
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Narrow routing interface used by the orchestrator.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Whether a running server advertises `name`.
    fn is_tool_available(&self, name: &str) -> bool;

    /// Invoke `name` on its owning server.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult>;

    /// The aggregate catalog.
    fn all_tools(&self) -> Vec<McpTool>;

    /// Names of running servers.
    fn connected_servers(&self) -> Vec<String>;
}

/// A tool name advertised by more than one running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCollision {
    /// The contested tool name.
    pub tool: String,
    /// Server whose registration was replaced.
    pub previous_server: String,
    /// Server that now owns the name.
    pub server: String,
}

/// Outcome of [`McpManager::start_all`].
#[derive(Debug, Clone, Default)]
pub struct StartSummary {
    /// Servers that started, in start order.
    pub started: Vec<String>,
    /// Servers that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Snapshot of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server name.
    pub name: String,
    /// Whether the configuration enables it.
    pub enabled: bool,
    /// Client state; `not_started` when no client exists.
    pub state: ClientState,
    /// Tools the server advertises.
    pub tool_count: usize,
    /// Background restarts since the last explicit start.
    pub restarts: u32,
    /// Identity reported by the server during the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Negotiated protocol version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    clients: HashMap<String, Arc<McpClient>>,
    /// Running servers, oldest first. Later entries win tool collisions.
    start_order: Vec<String>,
    tools: BTreeMap<String, McpTool>,
    collisions: Vec<ToolCollision>,
}

impl Registry {
    fn insert(&mut self, client: Arc<McpClient>) {
        let name = client.name().to_string();
        self.start_order.retain(|n| n != &name);
        self.start_order.push(name.clone());
        self.clients.insert(name, client);
        self.rebuild();
    }

    fn remove(&mut self, name: &str) -> Option<Arc<McpClient>> {
        let client = self.clients.remove(name)?;
        self.start_order.retain(|n| n != name);
        self.rebuild();
        Some(client)
    }

    /// Recompute the catalog from live clients in start order.
    fn rebuild(&mut self) {
        let mut tools = BTreeMap::new();
        let mut collisions = Vec::new();
        for server in &self.start_order {
            let Some(client) = self.clients.get(server) else {
                continue;
            };
            for tool in client.tools() {
                let key = tool.name.clone();
                if let Some(previous) = tools.insert(key.clone(), tool) {
                    collisions.push(ToolCollision {
                        tool: key,
                        previous_server: previous.server,
                        server: server.clone(),
                    });
                }
            }
        }
        self.tools = tools;
        self.collisions = collisions;
    }

    fn clear(&mut self) -> Vec<Arc<McpClient>> {
        let clients = self
            .start_order
            .drain(..)
            .filter_map(|name| self.clients.remove(&name))
            .collect();
        self.clients.clear();
        self.tools.clear();
        self.collisions.clear();
        clients
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// McpManager
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    config: RwLock<McpConfig>,
    registry: RwLock<Registry>,
    lifecycle: tokio::sync::Mutex<()>,
    restarts: Mutex<HashMap<String, u32>>,
    restarting: Mutex<HashSet<String>>,
    transport_options: TransportOptions,
}

/// Owner of every MCP client and the aggregate tool catalog.
///
/// Cheap to clone; clones share the same servers.
#[derive(Clone)]
pub struct McpManager {
    inner: Arc<Inner>,
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl McpManager {
    /// Create a manager with no configuration.
    pub fn new() -> Self {
        Self::with_config(McpConfig::default())
    }

    /// Create a manager for an already parsed configuration.
    pub fn with_config(config: McpConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                registry: RwLock::new(Registry::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                restarts: Mutex::new(HashMap::new()),
                restarting: Mutex::new(HashSet::new()),
                transport_options: TransportOptions::default(),
            }),
        }
    }

    /// Use non-default transport options for clients started from now on.
    ///
    /// Must be called before the manager is cloned.
    pub fn with_transport_options(mut self, options: TransportOptions) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.transport_options = options;
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the configuration. Nothing is started or stopped.
    pub fn load_config(&self, config: McpConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(
            servers = config.servers.len(),
            enabled = config.enabled_servers().count(),
            "Loaded MCP configuration"
        );
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Load the configuration from a YAML or TOML file.
    pub fn load_config_file(&self, path: &Path) -> Result<()> {
        let config = McpConfig::from_file(path)?;
        self.load_config(config)
    }

    /// Load the configuration from the discovered location, if any.
    ///
    /// Returns the file that was read. Finding nothing is not an error.
    pub fn load_config_from_env(&self) -> Result<Option<PathBuf>> {
        let loaded = McpConfig::discover()?;
        match &loaded.source {
            Some(path) => tracing::info!(path = %path.display(), "Using MCP configuration"),
            None => tracing::info!("No MCP configuration found; MCP tools disabled"),
        }
        self.load_config(loaded.config)?;
        Ok(loaded.source)
    }

    /// Current runtime settings.
    pub fn settings(&self) -> RuntimeSettings {
        self.inner.config.read().settings
    }

    /// A copy of the loaded configuration.
    pub fn config(&self) -> McpConfig {
        self.inner.config.read().clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start every enabled server that is not already running.
    ///
    /// A server that fails to start is logged and skipped; the others still
    /// start. Disabled servers are never started.
    pub async fn start_all(&self) -> StartSummary {
        let _guard = self.inner.lifecycle.lock().await;
        let servers: Vec<ServerConfig> = self.inner.config.read().servers.clone();

        let mut summary = StartSummary::default();
        for server in servers {
            if !server.enabled {
                tracing::debug!(server = %server.name, "Skipping disabled MCP server");
                continue;
            }
            if self.inner.registry.read().clients.contains_key(&server.name) {
                continue;
            }
            match self.launch(&server).await {
                Ok(client) => {
                    self.register(client);
                    summary.started.push(server.name);
                }
                Err(e) => {
                    tracing::error!(
                        server = %server.name,
                        error = %e,
                        "Failed to start MCP server"
                    );
                    summary.failed.push((server.name, e.to_string()));
                }
            }
        }

        tracing::info!(
            started = summary.started.len(),
            failed = summary.failed.len(),
            tools = self.tool_count(),
            "MCP startup complete"
        );
        summary
    }

    /// Start one configured server.
    ///
    /// Fails if the server is unknown, disabled or already running. Resets
    /// the server's background restart counter.
    pub async fn start_server(&self, name: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let server = self.enabled_server(name)?;
        if self.inner.registry.read().clients.contains_key(name) {
            return Err(McpError::AlreadyRunning(name.to_string()));
        }
        self.inner.restarts.lock().remove(name);
        let client = self.launch(&server).await?;
        self.register(client);
        Ok(())
    }

    /// Stop one server and drop its tools from the catalog.
    ///
    /// Stopping a configured server that is not running is a no-op.
    pub async fn stop_server(&self, name: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.inner.config.read().server(name).is_none()
            && !self.inner.registry.read().clients.contains_key(name)
        {
            return Err(McpError::ServerNotFound(name.to_string()));
        }
        self.shutdown(name).await
    }

    /// Stop (if running) and start a server again with a fresh client.
    pub async fn restart_server(&self, name: &str) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let server = self.enabled_server(name)?;
        if let Err(e) = self.shutdown(name).await {
            tracing::warn!(server = %name, error = %e, "Error stopping MCP server for restart");
        }
        self.inner.restarts.lock().remove(name);
        let client = self.launch(&server).await?;
        self.register(client);
        Ok(())
    }

    /// Close every client and clear the catalog.
    ///
    /// Every client is closed even if some fail; the last error is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let clients = self.inner.registry.write().clear();
        if clients.is_empty() {
            return Ok(());
        }

        tracing::info!(count = clients.len(), "Stopping all MCP servers");
        let mut last_error = None;
        for client in clients {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %client.name(), error = %e, "Error stopping MCP server");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────────

    /// Invoke a tool on its owning server under that server's call timeout.
    ///
    /// Unknown tools fail immediately with [`McpError::ToolNotFound`]. A
    /// transport-class failure schedules a background restart when the
    /// auto-restart policy allows it; the call itself still fails.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let client = {
            let registry = self.inner.registry.read();
            registry
                .tools
                .get(name)
                .and_then(|tool| registry.clients.get(&tool.server))
                .cloned()
        };
        let Some(client) = client else {
            return Err(McpError::ToolNotFound(name.to_string()));
        };

        let started = std::time::Instant::now();
        let result = client.call_tool(name, arguments).await;
        match &result {
            Ok(r) => tracing::debug!(
                server = %client.name(),
                tool = %name,
                is_error = r.is_error(),
                duration_ms = started.elapsed().as_millis() as u64,
                "MCP tool call finished"
            ),
            Err(e) => {
                tracing::warn!(
                    server = %client.name(),
                    tool = %name,
                    error = %e,
                    "MCP tool call failed"
                );
                if e.is_transport_failure()
                    && !self.schedule_restart(Arc::clone(&client))
                    && !client.is_ready()
                {
                    self.retire(&client).await;
                }
            }
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether a running server advertises `name`.
    pub fn is_tool_available(&self, name: &str) -> bool {
        self.inner.registry.read().tools.contains_key(name)
    }

    /// The aggregate catalog, sorted by tool name.
    pub fn all_tools(&self) -> Vec<McpTool> {
        self.inner.registry.read().tools.values().cloned().collect()
    }

    /// Look up one tool.
    pub fn tool(&self, name: &str) -> Option<McpTool> {
        self.inner.registry.read().tools.get(name).cloned()
    }

    /// Whether the catalog is non-empty.
    pub fn has_tools(&self) -> bool {
        !self.inner.registry.read().tools.is_empty()
    }

    /// Number of tools in the catalog.
    pub fn tool_count(&self) -> usize {
        self.inner.registry.read().tools.len()
    }

    /// Names of running servers, oldest first.
    pub fn connected_servers(&self) -> Vec<String> {
        self.inner.registry.read().start_order.clone()
    }

    /// Number of running clients.
    pub fn client_count(&self) -> usize {
        self.inner.registry.read().clients.len()
    }

    /// A running client by server name.
    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.inner.registry.read().clients.get(name).cloned()
    }

    /// Tool names claimed by more than one running server.
    pub fn tool_collisions(&self) -> Vec<ToolCollision> {
        self.inner.registry.read().collisions.clone()
    }

    /// Status of every configured server, in configuration order, followed
    /// by any running server no longer in the configuration.
    pub fn server_statuses(&self) -> Vec<ServerStatus> {
        let config = self.inner.config.read();
        let registry = self.inner.registry.read();
        let restarts = self.inner.restarts.lock();

        let status = |name: &str, enabled: bool| {
            let client = registry.clients.get(name);
            let peer = client.and_then(|c| c.peer());
            ServerStatus {
                name: name.to_string(),
                enabled,
                state: client.map_or(ClientState::NotStarted, |c| c.state()),
                tool_count: client.map_or(0, |c| c.tools().len()),
                restarts: restarts.get(name).copied().unwrap_or(0),
                protocol_version: peer.as_ref().map(|p| p.protocol_version.clone()),
                server_info: peer.map(|p| p.server_info),
            }
        };

        let mut statuses: Vec<ServerStatus> = config
            .servers
            .iter()
            .map(|s| status(&s.name, s.enabled))
            .collect();
        for name in &registry.start_order {
            if config.server(name).is_none() {
                statuses.push(status(name, true));
            }
        }
        statuses
    }

    /// The catalog rendered as OpenAI `function` tools.
    pub fn tools_as_openai(&self) -> Vec<toolgate_types::Tool> {
        self.inner
            .registry
            .read()
            .tools
            .values()
            .map(|tool| {
                let description = (!tool.description.is_empty()).then(|| tool.description.clone());
                toolgate_types::Tool::function(
                    tool.name.clone(),
                    description,
                    Some(tool.input_schema.clone()),
                )
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn enabled_server(&self, name: &str) -> Result<ServerConfig> {
        let config = self.inner.config.read();
        let server = config
            .server(name)
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;
        if !server.enabled {
            return Err(McpError::config(format!("server '{}' is disabled", name)));
        }
        Ok(server.clone())
    }

    /// Build and start a client. No registry lock is held.
    async fn launch(&self, server: &ServerConfig) -> Result<Arc<McpClient>> {
        let settings = self.settings();
        let client = McpClient::new(&server.name, &settings)
            .with_transport_options(self.inner.transport_options);

        let command = expand_env(&server.command);
        let args: Vec<String> = server.args.iter().map(|a| expand_env(a)).collect();
        client.start(&command, &args, &server.env).await?;
        Ok(Arc::new(client))
    }

    fn register(&self, client: Arc<McpClient>) {
        let name = client.name().to_string();
        let mut registry = self.inner.registry.write();
        registry.insert(client);
        for collision in registry.collisions.iter().filter(|c| c.server == name) {
            tracing::warn!(
                tool = %collision.tool,
                previous_server = %collision.previous_server,
                server = %collision.server,
                "MCP tool name collision; later server wins"
            );
        }
        tracing::info!(
            server = %name,
            tools = registry.tools.len(),
            "Registered MCP server"
        );
    }

    async fn shutdown(&self, name: &str) -> Result<()> {
        let Some(client) = self.inner.registry.write().remove(name) else {
            tracing::debug!(server = %name, "MCP server not running");
            return Ok(());
        };
        client.close().await
    }

    /// Close a suspect client and start a replacement in the background.
    ///
    /// Returns whether a restart is pending for the server.
    fn schedule_restart(&self, failed: Arc<McpClient>) -> bool {
        let settings = self.settings();
        if !settings.auto_restart {
            return false;
        }
        let name = failed.name().to_string();

        let attempt = {
            let mut restarts = self.inner.restarts.lock();
            let count = restarts.entry(name.clone()).or_insert(0);
            if *count >= settings.max_restarts {
                tracing::error!(
                    server = %name,
                    restarts = *count,
                    "MCP server exceeded restart limit; leaving it stopped"
                );
                return false;
            }
            if !self.inner.restarting.lock().insert(name.clone()) {
                return true;
            }
            *count += 1;
            *count
        };

        let delay = restart_backoff(attempt);
        tracing::warn!(
            server = %name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling MCP server restart"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.restart_replacing(&name, &failed).await {
                tracing::error!(server = %name, error = %e, "MCP server restart failed");
            }
        });
        true
    }

    /// Drop a dead client from the catalog, unless it was already replaced.
    async fn retire(&self, failed: &Arc<McpClient>) {
        let name = failed.name();
        let removed = {
            let mut registry = self.inner.registry.write();
            if registry
                .clients
                .get(name)
                .is_some_and(|c| Arc::ptr_eq(c, failed))
            {
                registry.remove(name)
            } else {
                None
            }
        };
        if removed.is_none() {
            return;
        }
        tracing::warn!(server = %name, "Removed dead MCP server from the catalog");
        if let Err(e) = failed.close().await {
            tracing::debug!(server = %name, error = %e, "Error closing dead MCP server");
        }
    }

    /// Replace `failed` with a fresh client, unless someone already stopped
    /// or replaced it.
    async fn restart_replacing(&self, name: &str, failed: &Arc<McpClient>) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let launched = self.relaunch(name, failed).await;
        // Cleared before registering so a failure of the new client can
        // schedule its own restart.
        self.inner.restarting.lock().remove(name);
        if let Some(client) = launched? {
            self.register(client);
            tracing::info!(server = %name, "MCP server restarted");
        }
        Ok(())
    }

    /// Close `failed` and launch its replacement. `None` when the server
    /// was stopped or replaced in the meantime.
    async fn relaunch(
        &self,
        name: &str,
        failed: &Arc<McpClient>,
    ) -> Result<Option<Arc<McpClient>>> {
        {
            let mut registry = self.inner.registry.write();
            let current = registry.clients.get(name);
            if !current.is_some_and(|c| Arc::ptr_eq(c, failed)) {
                tracing::debug!(server = %name, "MCP server changed since failure; skipping restart");
                return Ok(None);
            }
            registry.remove(name);
        }
        if let Err(e) = failed.close().await {
            tracing::debug!(server = %name, error = %e, "Error closing failed MCP server");
        }

        let server = self.enabled_server(name)?;
        self.launch(&server).await.map(Some)
    }
}

/// Exponential backoff: `min * 2^(attempt-1)`, capped.
fn restart_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    RESTART_BACKOFF_MIN
        .saturating_mul(1u32 << exp)
        .min(RESTART_BACKOFF_MAX)
}

#[async_trait]
impl ToolRouter for McpManager {
    fn is_tool_available(&self, name: &str) -> bool {
        McpManager::is_tool_available(self, name)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        McpManager::call_tool(self, name, arguments).await
    }

    fn all_tools(&self) -> Vec<McpTool> {
        McpManager::all_tools(self)
    }

    fn connected_servers(&self) -> Vec<String> {
        McpManager::connected_servers(self)
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("McpManager")
            .field(
                "configured",
                &self
                    .inner
                    .config
                    .read()
                    .servers
                    .iter()
                    .map(|s| s.name.clone())
                    .collect::<Vec<_>>(),
            )
            .field("running", &registry.start_order)
            .field("tools", &registry.tools.len())
            .finish()
    }
}
