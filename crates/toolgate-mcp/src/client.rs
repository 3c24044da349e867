//! MCP client for one server.
//!
//! A client drives a [`StdioTransport`] through the handshake and exposes
//! typed operations. Every exchange runs on the blocking pool and is raced
//! against a deadline. The blocking read cannot be cancelled, so a timed-out
//! client is suspect: the caller should close it and start a fresh one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::config::RuntimeSettings;
use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcResponse,
    ListToolsParams, ListToolsResult, McpTool, methods,
};
use crate::transport::{StdioTransport, TransportOptions};

/// Upper bound on `tools/list` pages, guarding against cursor loops.
const MAX_TOOL_PAGES: usize = 64;

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No process running. `start` may be called.
    NotStarted,
    /// Process spawned, handshake in progress.
    Initializing,
    /// Handshake and discovery complete.
    Ready,
    /// Closed for good. A restart needs a new client.
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An MCP client bound to a single server process.
pub struct McpClient {
    name: String,
    init_timeout: Duration,
    call_timeout: Duration,
    transport_options: TransportOptions,
    transport: Mutex<Option<Arc<StdioTransport>>>,
    state: Mutex<ClientState>,
    peer: Mutex<Option<InitializeResult>>,
    tools: RwLock<Vec<McpTool>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("tools", &self.tools.read().len())
            .finish()
    }
}

impl McpClient {
    /// Create a client for the named server using the given timeouts.
    pub fn new(name: impl Into<String>, settings: &RuntimeSettings) -> Self {
        Self {
            name: name.into(),
            init_timeout: settings.init_timeout,
            call_timeout: settings.call_timeout,
            transport_options: TransportOptions::default(),
            transport: Mutex::new(None),
            state: Mutex::new(ClientState::NotStarted),
            peer: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Override transport tunables.
    pub fn with_transport_options(mut self, options: TransportOptions) -> Self {
        self.transport_options = options;
        self
    }

    /// Server name this client belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Whether the handshake completed.
    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready
    }

    /// Whether the underlying process is still alive and usable.
    pub fn is_alive(&self) -> bool {
        self.transport
            .lock()
            .as_ref()
            .is_some_and(|t| t.is_running())
    }

    /// Tools discovered by the last `list_tools`.
    pub fn tools(&self) -> Vec<McpTool> {
        self.tools.read().clone()
    }

    /// Peer identity and capabilities from `initialize`.
    pub fn peer(&self) -> Option<InitializeResult> {
        self.peer.lock().clone()
    }

    /// Recent stderr output from the server process.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.transport
            .lock()
            .as_ref()
            .map(|t| t.stderr_tail())
            .unwrap_or_default()
    }

    /// Spawn the server, run the handshake and discover tools.
    ///
    /// On failure the process is stopped and the client returns to
    /// [`ClientState::NotStarted`].
    pub async fn start(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ClientState::NotStarted => *state = ClientState::Initializing,
                ClientState::Closed => return Err(McpError::ConnectionClosed),
                ClientState::Initializing | ClientState::Ready => {
                    return Err(McpError::AlreadyRunning(self.name.clone()));
                }
            }
        }

        tracing::info!(server = %self.name, command = %command, "Starting MCP server");

        let transport =
            match StdioTransport::spawn_with(&self.name, command, args, env, self.transport_options)
            {
                Ok(t) => Arc::new(t),
                Err(e) => {
                    *self.state.lock() = ClientState::NotStarted;
                    return Err(e);
                }
            };
        *self.transport.lock() = Some(transport);

        let handshake = async {
            self.initialize().await?;
            self.list_tools().await
        };

        match handshake.await {
            Ok(tools) => {
                {
                    let mut state = self.state.lock();
                    // close() may have run while the handshake was in flight.
                    if *state == ClientState::Closed {
                        return Err(McpError::ConnectionClosed);
                    }
                    *state = ClientState::Ready;
                }
                tracing::info!(
                    server = %self.name,
                    tools = tools.len(),
                    "MCP server ready"
                );
                Ok(())
            }
            Err(e) => {
                let stderr = self.stderr_tail();
                tracing::warn!(
                    server = %self.name,
                    error = %e,
                    stderr = %stderr.join(" | "),
                    "MCP handshake failed"
                );
                self.shutdown_transport().await;
                self.peer.lock().take();
                self.tools.write().clear();
                let mut state = self.state.lock();
                if *state != ClientState::Closed {
                    *state = ClientState::NotStarted;
                }
                Err(e)
            }
        }
    }

    /// Send `initialize` and, on success, the `initialized` notification.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self
            .exchange(methods::INITIALIZE, Some(params), self.init_timeout)
            .await?;
        let value = response
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid initialize result: {}", e)))?;

        tracing::debug!(
            server = %self.name,
            peer = %result.server_info.name,
            peer_version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP initialize complete"
        );
        *self.peer.lock() = Some(result.clone());

        let transport = self.current_transport()?;
        tokio::task::spawn_blocking(move || transport.notify(methods::INITIALIZED, None))
            .await
            .map_err(|e| McpError::transport(format!("notify task failed: {}", e)))??;

        Ok(result)
    }

    /// Fetch the server's tools, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        if self.peer.lock().is_none() {
            return Err(McpError::NotInitialized);
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.clone(),
            })?;
            let response = self
                .exchange(methods::TOOLS_LIST, Some(params), self.init_timeout)
                .await?;
            let value = response
                .into_result()
                .map_err(|e| McpError::server_error(e.code, e.message, e.data))?;
            let page: ListToolsResult = serde_json::from_value(value)
                .map_err(|e| McpError::protocol(format!("invalid tools/list result: {}", e)))?;

            tools.extend(
                page.tools
                    .into_iter()
                    .map(|info| McpTool::from_info(info, &self.name)),
            );

            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        *self.tools.write() = tools.clone();
        Ok(tools)
    }

    /// Invoke a tool.
    ///
    /// A JSON-RPC error from the server becomes an `is_error` result so the
    /// surrounding conversation can continue. Only transport failures and
    /// timeouts are returned as errors.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if !self.is_ready() {
            return Err(McpError::NotInitialized);
        }

        let arguments = match arguments {
            Value::Null => None,
            other => Some(other),
        };
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;

        tracing::debug!(server = %self.name, tool = %name, "Calling MCP tool");
        let response = self
            .exchange(methods::TOOLS_CALL, Some(params), self.call_timeout)
            .await?;

        match response.into_result() {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| McpError::protocol(format!("invalid tools/call result: {}", e))),
            Err(err) => {
                tracing::info!(
                    server = %self.name,
                    tool = %name,
                    code = err.code,
                    message = %err.message,
                    "MCP tool returned an error"
                );
                Ok(CallToolResult::error(format!(
                    "Tool error: {} (code: {})",
                    err.message, err.code
                )))
            }
        }
    }

    /// Mark the client closed and stop its process. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        *self.state.lock() = ClientState::Closed;
        self.peer.lock().take();
        let Some(transport) = self.transport.lock().take() else {
            return Ok(());
        };
        tracing::info!(server = %self.name, "Stopping MCP server");
        tokio::task::spawn_blocking(move || transport.stop())
            .await
            .map_err(|e| McpError::transport(format!("stop task failed: {}", e)))?
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn current_transport(&self) -> Result<Arc<StdioTransport>> {
        self.transport.lock().clone().ok_or(McpError::NotInitialized)
    }

    /// Run one request/response exchange off the async runtime, bounded by
    /// `timeout`.
    async fn exchange(
        &self,
        method: &'static str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let transport = self.current_transport()?;
        let task = tokio::task::spawn_blocking(move || transport.send(method, params));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(e))) => {
                if e.is_transport_failure() {
                    self.mark_broken(&e);
                }
                Err(e)
            }
            Ok(Err(join)) => Err(McpError::transport(format!(
                "exchange task failed: {}",
                join
            ))),
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "MCP exchange timed out; transport is suspect"
                );
                Err(McpError::timeout(method, timeout))
            }
        }
    }

    /// A ready client whose stream failed is closed for good. The handshake
    /// path handles its own failures in `start`.
    fn mark_broken(&self, error: &McpError) {
        let mut state = self.state.lock();
        if *state == ClientState::Ready {
            tracing::warn!(
                server = %self.name,
                error = %error,
                "MCP transport failed; closing client"
            );
            *state = ClientState::Closed;
        }
    }

    async fn shutdown_transport(&self) {
        let Some(transport) = self.transport.lock().take() else {
            return;
        };
        match tokio::task::spawn_blocking(move || transport.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(server = %self.name, error = %e, "Error stopping MCP server");
            }
            Err(e) => {
                tracing::debug!(server = %self.name, error = %e, "Stop task failed");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    /// A scripted server: answers initialize, swallows the initialized
    /// notification, lists one tool, then fails the first call.
    const SCRIPTED_SERVER: &str = r#"
read l
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"scripted","version":"0.1"}}}'
read n
read l
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","description":"Ping"}]}}'
read l
echo '{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"boom"}}'
sleep 5
"#;

    fn settings() -> RuntimeSettings {
        RuntimeSettings::default()
            .with_init_timeout(Duration::from_secs(5))
            .with_call_timeout(Duration::from_secs(5))
    }

    fn sh_args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn fast_stop() -> TransportOptions {
        TransportOptions::default().with_stop_grace(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_new_client_is_not_started() {
        let client = McpClient::new("idle", &settings());
        assert_eq!(client.state(), ClientState::NotStarted);
        assert!(!client.is_alive());
        assert!(client.tools().is_empty());

        let err = client.call_tool("anything", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized));
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_start_handshake_and_tool_error_translation() {
        let client = McpClient::new("scripted", &settings()).with_transport_options(fast_stop());
        client
            .start("sh", &sh_args(SCRIPTED_SERVER), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.peer().unwrap().server_info.name, "scripted");
        let tools = client.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "ping");
        assert_eq!(tools[0].server, "scripted");

        let result = client.call_tool("ping", json!({})).await.unwrap();
        assert!(result.is_error());
        assert_eq!(result.text(), "Tool error: boom (code: -32000)");

        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_dead_process_closes_client() {
        let script = r#"
read l
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fragile","version":"0.1"}}}'
read n
read l
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","description":"Ping"}]}}'
read l
exit 1
"#;
        let client = McpClient::new("fragile", &settings()).with_transport_options(fast_stop());
        client
            .start("sh", &sh_args(script), &BTreeMap::new())
            .await
            .unwrap();
        assert!(client.is_ready());

        let err = client.call_tool("ping", json!({})).await.unwrap_err();
        assert!(err.is_transport_failure());
        assert!(!err.is_timeout());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(!client.is_alive());

        let err = client.call_tool("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_client_restartable() {
        let client = McpClient::new("missing", &settings());
        let err = client
            .start("nonexistent-mcp-server-12345", &[], &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed(_)));
        assert_eq!(client.state(), ClientState::NotStarted);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let settings = settings().with_init_timeout(Duration::from_millis(200));
        let client = McpClient::new("silent", &settings).with_transport_options(fast_stop());
        let err = client
            .start("sh", &sh_args("sleep 5"), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.state(), ClientState::NotStarted);
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let client = McpClient::new("closing", &settings());
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);

        let err = client
            .start("sh", &sh_args("sleep 1"), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ClientState::NotStarted.to_string(), "not_started");
        assert_eq!(ClientState::Ready.to_string(), "ready");
        assert_eq!(
            serde_json::to_value(ClientState::Initializing).unwrap(),
            json!("initializing")
        );
    }
}
