//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use toolgate_llm::MockBackend;
use toolgate_mcp::{McpConfig, McpManager, RuntimeSettings, ServerConfig as McpServerConfig};
use toolgate_server::{Server, ServerConfig};

/// A minimal MCP server: one `ping` tool that answers `pong`.
const SHELL_MCP_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"shell","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Reply with pong","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"method not found"}}\n' "$id" ;;
  esac
done
"#;

/// A gateway running in the background on an ephemeral port.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client.
    pub client: Client,
    /// The scripted backend.
    pub backend: Arc<MockBackend>,
    /// The MCP manager shared with the server.
    pub mcp: McpManager,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Start a gateway whose backend answers with `replies` in order and
    /// whose MCP configuration declares one `shell` server with a `ping`
    /// tool.
    pub async fn start(replies: Vec<&str>) -> Result<Self> {
        Self::start_with(MockBackend::new(replies), Duration::from_secs(10)).await
    }

    /// Like [`start`](Self::start), with a custom backend and request
    /// timeout.
    pub async fn start_with(backend: MockBackend, request_timeout: Duration) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let script = write_mcp_script(&temp_dir)?;

        let mut mcp_config = McpConfig::default();
        mcp_config.settings = RuntimeSettings::default()
            .with_init_timeout(Duration::from_secs(10))
            .with_call_timeout(Duration::from_secs(10))
            .with_auto_restart(false);
        mcp_config.servers.push(
            McpServerConfig::new("shell", "sh").with_arg(script.to_string_lossy().into_owned()),
        );
        let mcp = McpManager::with_config(mcp_config);
        let summary = mcp.start_all().await;
        anyhow::ensure!(summary.failed.is_empty(), "MCP start failed: {:?}", summary.failed);

        let backend = Arc::new(backend);
        let config = ServerConfig::new()
            .with_request_timeout(request_timeout)
            .with_request_logging(false);
        let server = Server::new(backend.clone(), mcp.clone(), config);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                rx.await.ok();
            };
            server.serve(listener, shutdown).await.ok();
        });

        Ok(Self {
            addr,
            client: Client::new(),
            backend,
            mcp,
            shutdown: Some(tx),
            handle: Some(handle),
            _temp_dir: temp_dir,
        })
    }

    /// Base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Build a GET request.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    /// Build a POST request.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base_url(), path))
    }

    /// Trigger graceful shutdown and wait for the server to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(10), handle).await??;
        }
        Ok(())
    }
}

fn write_mcp_script(dir: &TempDir) -> Result<PathBuf> {
    let path = dir.path().join("mcp-server.sh");
    std::fs::write(&path, SHELL_MCP_SERVER)?;
    Ok(path)
}
