//! MCP (Model Context Protocol) runtime for Toolgate.
//!
//! Starts and supervises MCP tool servers as child processes, speaks
//! JSON-RPC 2.0 with them over stdio, and routes tool calls by name across
//! every running server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpManager                                                 │
//! │  - Loads server configuration (YAML / TOML)                 │
//! │  - Aggregate tool catalog, tool name → server routing       │
//! │  - start / stop / restart, background auto-restart          │
//! └─────────────────────────────────────────────────────────────┘
//!                           │ one per server
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                  │
//! │  - initialize, tools/list (paginated), tools/call           │
//! │  - Per-operation timeouts                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StdioTransport                                             │
//! │  - Newline-delimited JSON-RPC 2.0                           │
//! │  - One exchange in flight, stderr drained in background     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolgate_mcp::{McpConfig, McpManager, ServerConfig};
//!
//! let mut config = McpConfig::default();
//! config.servers.push(
//!     ServerConfig::new("fs", "npx")
//!         .with_args(["-y", "@modelcontextprotocol/server-filesystem", "$HOME"]),
//! );
//!
//! let manager = McpManager::with_config(config);
//! manager.start_all().await;
//! for tool in manager.all_tools() {
//!     println!("{} ({})", tool.name, tool.server);
//! }
//! ```
//!
//! # Wire format
//!
//! ```text
//! → {"jsonrpc":"2.0","id":1,"method":"initialize","params":{...}}
//! ← {"jsonrpc":"2.0","id":1,"result":{...}}
//! → {"jsonrpc":"2.0","method":"notifications/initialized"}
//! → {"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}
//! ```
//!
//! A server must not write unsolicited lines while a request is
//! outstanding; see [`transport`].

pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, McpClient};
pub use config::{
    CONFIG_PATH_ENV, ConfigFormat, LoadedMcpConfig, McpConfig, RuntimeSettings, ServerConfig,
};
pub use error::{McpError, Result};
pub use manager::{McpManager, ServerStatus, StartSummary, ToolCollision, ToolRouter};
pub use protocol::{
    CallToolResult, InitializeResult, JsonRpcError, McpTool, ResourceContents, ServerInfo,
    ToolContent, ToolInfo,
};
pub use transport::{StdioTransport, TransportOptions};
