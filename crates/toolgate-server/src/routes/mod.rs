//! API routes.

pub mod chat;
pub mod health;
pub mod mcp;

pub use chat::chat_completions_handler;
pub use health::{HealthResponse, health_routes};
pub use mcp::{
    ListServersResponse, ListToolsResponse, call_tool_handler, list_servers_handler,
    list_tools_handler, restart_server_handler, start_server_handler, stop_server_handler,
};
