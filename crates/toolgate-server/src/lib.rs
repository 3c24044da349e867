//! OpenAI-compatible HTTP facade for Toolgate.
//!
//! Exposes the inference backend as `POST /v1/chat/completions` (JSON or
//! SSE), with the MCP tool catalog advertised to the model and MCP tool
//! calls executed on its behalf, plus inspection routes for the MCP
//! runtime and health probes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolgate_llm::ClaudeCliBackend;
//! use toolgate_mcp::McpManager;
//! use toolgate_server::{Server, ServerConfig};
//!
//! let manager = McpManager::new();
//! manager.load_config_from_env()?;
//! manager.start_all().await;
//!
//! let backend = Arc::new(ClaudeCliBackend::default());
//! let server = Server::new(backend, manager, ServerConfig::default());
//! server.run_with_shutdown(toolgate_server::shutdown_signal()).await?;
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use middleware::{REQUEST_ID_HEADER, RequestId};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, extract::DefaultBodyLimit};
use tokio::net::TcpListener;
use toolgate_llm::SharedBackend;
use toolgate_mcp::McpManager;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The Toolgate HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server over a backend and an MCP manager.
    pub fn new(backend: SharedBackend, mcp: McpManager, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(backend, mcp, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .nest("/v1", self.api_routes())
            // Request logging (inner layer, sees the request id)
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                middleware::request_logging_middleware,
            ))
            .layer(axum::middleware::from_fn(middleware::request_id_middleware))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.state.config.max_body_size))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1).
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route("/chat/completions", post(routes::chat_completions_handler))
            .route("/mcp/tools", get(routes::list_tools_handler))
            .route("/mcp/tools/{name}/call", post(routes::call_tool_handler))
            .route("/mcp/servers", get(routes::list_servers_handler))
            .route("/mcp/servers/{name}/start", post(routes::start_server_handler))
            .route("/mcp/servers/{name}/stop", post(routes::stop_server_handler))
            .route(
                "/mcp/servers/{name}/restart",
                post(routes::restart_server_handler),
            )
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.bind_address();
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Serve until `shutdown` resolves, then stop every MCP server.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {}", e)))?;
        info!(addr = %local_addr, "Starting server");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        info!("Server stopped, shutting down MCP servers");
        if let Err(e) = self.state.mcp.stop_all().await {
            tracing::warn!(error = %e, "Error stopping MCP servers");
        }
        served
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
