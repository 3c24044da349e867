//! End-to-end tests against a gateway bound to a real port, with a
//! scripted stdio MCP server behind it.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::TestServer;
use serde_json::{Value, json};
use toolgate_llm::MockBackend;

const PING_CALL: &str = "Let me check.\n```json\n{\"tool_calls\":[{\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"ping\",\"arguments\":{}}}]}\n```";

#[tokio::test]
async fn test_health_reports_mcp_catalog() {
    let server = TestServer::start(vec!["unused"]).await.unwrap();

    let resp = server.get("/health").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mcp_servers"], 1);
    assert_eq!(body["mcp_tools"], 1);

    let resp = server.get("/readyz").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_list_tools_and_servers() {
    let server = TestServer::start(vec!["unused"]).await.unwrap();

    let body: Value = server
        .get("/v1/mcp/tools")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["tools"][0]["name"], "ping");
    assert_eq!(body["tools"][0]["server"], "shell");
    assert!(body.get("collisions").is_none());

    let body: Value = server
        .get("/v1/mcp/servers")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["servers"][0]["name"], "shell");
    assert_eq!(body["servers"][0]["state"], "ready");
    assert_eq!(body["servers"][0]["tool_count"], 1);
    assert_eq!(body["servers"][0]["server_info"]["name"], "shell");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_call_tool_directly() {
    let server = TestServer::start(vec!["unused"]).await.unwrap();

    let resp = server
        .post("/v1/mcp/tools/ping/call")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "pong");

    // Empty body means no arguments
    let resp = server.post("/v1/mcp/tools/ping/call").send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = server
        .post("/v1/mcp/tools/ping/call")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = server
        .post("/v1/mcp/tools/missing/call")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_lifecycle_routes() {
    let server = TestServer::start(vec!["unused"]).await.unwrap();

    let resp = server
        .post("/v1/mcp/servers/shell/start")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = server.post("/v1/mcp/servers/shell/stop").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "not_started");
    assert!(!server.mcp.is_tool_available("ping"));

    let resp = server
        .post("/v1/mcp/servers/shell/start")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "ready");
    assert!(server.mcp.is_tool_available("ping"));

    let resp = server
        .post("/v1/mcp/servers/shell/restart")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.mcp.tool_count(), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chat_runs_mcp_tool_and_continues() {
    let server = TestServer::start(vec![PING_CALL, "The server said pong."])
        .await
        .unwrap();

    let resp = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "Is the server alive?"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["choices"][0]["message"]["content"], "The server said pong.");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    let prompts = server.backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].system_prompt.contains("#### ping"));

    let tool_message = prompts[1]
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .expect("tool result in continuation");
    assert_eq!(tool_message.text(), "pong");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chat_tool_round_shares_request_timeout() {
    // Each completion takes 1.5s; both together overrun the 2s budget.
    let backend = MockBackend::new(vec![PING_CALL, "The server said pong."])
        .with_delay(Duration::from_millis(1500));
    let server = TestServer::start_with(backend, Duration::from_secs(2))
        .await
        .unwrap();

    let started = Instant::now();
    let resp = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "Is the server alive?"}]
        }))
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert_eq!(resp.status(), 200);
    assert!(elapsed < Duration::from_millis(2800), "took {:?}", elapsed);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    assert_eq!(body["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "ping");
    assert_eq!(server.backend.request_count(), 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chat_streaming_over_http() {
    let server = TestServer::start(vec!["streamed answer"]).await.unwrap();

    let resp = server
        .post("/v1/chat/completions")
        .json(&json!({
            "model": "test-model",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let body = resp.text().await.unwrap();
    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    assert_eq!(data.last(), Some(&"[DONE]"));
    assert!(body.contains("chat.completion.chunk"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_mcp_servers() {
    let server = TestServer::start(vec!["unused"]).await.unwrap();
    let mcp = server.mcp.clone();
    assert_eq!(mcp.client_count(), 1);

    server.shutdown().await.unwrap();
    assert_eq!(mcp.client_count(), 0);
}
