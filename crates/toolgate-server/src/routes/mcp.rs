//! MCP inspection and invocation endpoints.
//!
//! - `GET /v1/mcp/tools` - The aggregate tool catalog
//! - `GET /v1/mcp/servers` - Status of every configured server
//! - `POST /v1/mcp/tools/{name}/call` - Call one tool directly
//! - `POST /v1/mcp/servers/{name}/{start,stop,restart}` - Server lifecycle

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde::Serialize;
use toolgate_mcp::{CallToolResult, McpTool, ServerStatus, ToolCollision};

use crate::error::{Result, ServerError};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response for listing tools.
#[derive(Debug, Clone, Serialize)]
pub struct ListToolsResponse {
    /// Every tool in the catalog, sorted by name.
    pub tools: Vec<McpTool>,
    /// Number of tools.
    pub count: usize,
    /// Names advertised by more than one server.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub collisions: Vec<ToolCollision>,
}

/// Response for listing servers.
#[derive(Debug, Clone, Serialize)]
pub struct ListServersResponse {
    /// Every configured server.
    pub servers: Vec<ServerStatus>,
    /// Number of servers.
    pub count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /v1/mcp/tools - List the aggregate tool catalog.
pub async fn list_tools_handler(State(state): State<AppState>) -> Json<ListToolsResponse> {
    let tools = state.orchestrator.list_all_tools();
    Json(ListToolsResponse {
        count: tools.len(),
        tools,
        collisions: state.mcp.tool_collisions(),
    })
}

/// GET /v1/mcp/servers - List configured servers and their state.
pub async fn list_servers_handler(State(state): State<AppState>) -> Json<ListServersResponse> {
    let servers = state.mcp.server_statuses();
    Json(ListServersResponse {
        count: servers.len(),
        servers,
    })
}

/// POST /v1/mcp/tools/{name}/call - Call a tool with the body as arguments.
///
/// An empty body means no arguments.
pub async fn call_tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<CallToolResult>> {
    let arguments = std::str::from_utf8(&body)
        .map_err(|_| ServerError::invalid_request("invalid_json", "body is not valid UTF-8"))?;
    let result = state.orchestrator.call_tool_directly(&name, arguments).await?;
    Ok(Json(result))
}

/// POST /v1/mcp/servers/{name}/start - Start one server.
pub async fn start_server_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerStatus>> {
    state.mcp.start_server(&name).await?;
    server_status(&state, &name)
}

/// POST /v1/mcp/servers/{name}/stop - Stop one server.
pub async fn stop_server_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerStatus>> {
    state.mcp.stop_server(&name).await?;
    server_status(&state, &name)
}

/// POST /v1/mcp/servers/{name}/restart - Restart one server.
pub async fn restart_server_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerStatus>> {
    state.mcp.restart_server(&name).await?;
    server_status(&state, &name)
}

fn server_status(state: &AppState, name: &str) -> Result<Json<ServerStatus>> {
    state
        .mcp
        .server_statuses()
        .into_iter()
        .find(|s| s.name == name)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("Server '{}' not found", name)))
}
