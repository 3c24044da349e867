//! Health check endpoints.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status (`ok` or `unavailable`).
    pub status: String,
    /// Service version.
    pub version: String,
    /// Running MCP servers.
    pub mcp_servers: usize,
    /// Tools in the aggregate catalog.
    pub mcp_tools: usize,
}

impl HealthResponse {
    fn new(state: &AppState, status: &str) -> Self {
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mcp_servers: state.mcp.client_count(),
            mcp_tools: state.mcp.tool_count(),
        }
    }
}

/// Basic health check. Always ok while the process serves requests.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(&state, "ok"))
}

/// Readiness: the backend must pass its health check.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let check = tokio::time::timeout(state.config.readiness_timeout, state.backend.health_check());
    match check.await {
        Ok(Ok(())) => (StatusCode::OK, Json(HealthResponse::new(&state, "ok"))),
        Ok(Err(e)) => {
            tracing::warn!(backend = %state.backend.name(), error = %e, "backend not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new(&state, "unavailable")),
            )
        }
        Err(_) => {
            tracing::warn!(backend = %state.backend.name(), "backend health check timed out");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new(&state, "unavailable")),
            )
        }
    }
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/livez", get(health))
        .route("/readyz", get(readyz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{body::Body, http::Request};
    use toolgate_llm::MockBackend;
    use toolgate_mcp::McpManager;
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    fn app(backend: MockBackend) -> Router {
        let state = AppState::new(Arc::new(backend), McpManager::new(), ServerConfig::default());
        health_routes().with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, HealthResponse) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, health) = get_json(app(MockBackend::with_text("x")), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
        assert_eq!(health.mcp_servers, 0);
        assert_eq!(health.mcp_tools, 0);
    }

    #[tokio::test]
    async fn test_livez_ignores_backend() {
        let (status, _) = get_json(app(MockBackend::with_text("x").unhealthy()), "/livez").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_reflects_backend() {
        let (status, health) = get_json(app(MockBackend::with_text("x")), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");

        let (status, health) =
            get_json(app(MockBackend::with_text("x").unhealthy()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health.status, "unavailable");
    }
}
