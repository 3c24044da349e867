//! Tool execution and the continuation round.
//!
//! The [`ToolOrchestrator`] takes a chat response whose assistant message
//! carries extracted tool calls, executes the MCP-routed ones through a
//! [`ToolRouter`], and asks the backend once more with the results appended.
//!
//! Only a single continuation round is performed. If the continuation asks
//! for more tools, those calls are returned to the caller unexecuted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use toolgate_llm::{BackendPrompt, SharedBackend};
use toolgate_mcp::{CallToolResult, McpTool, ToolContent, ToolRouter};
use toolgate_types::{ChatCompletionRequest, ChatCompletionResponse, Message, ToolCall};

use crate::error::{AgentError, Result};
use crate::extract::answer_to_response;

/// Default budget for tool execution plus the continuation call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Bridges backend tool calls to MCP servers.
#[derive(Clone)]
pub struct ToolOrchestrator {
    router: Arc<dyn ToolRouter>,
    backend: SharedBackend,
    request_timeout: Duration,
}

impl ToolOrchestrator {
    /// Create an orchestrator over a router and a backend.
    pub fn new(router: Arc<dyn ToolRouter>, backend: SharedBackend) -> Self {
        Self {
            router,
            backend,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the budget used by [`resolve_tool_calls`](Self::resolve_tool_calls).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The backend used for continuations.
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Every tool in the aggregate catalog.
    pub fn list_all_tools(&self) -> Vec<McpTool> {
        self.router.all_tools()
    }

    /// Names of running MCP servers.
    pub fn list_connected_servers(&self) -> Vec<String> {
        self.router.connected_servers()
    }

    /// Call one tool with JSON-encoded arguments. An empty string means `{}`.
    pub async fn call_tool_directly(&self, name: &str, arguments: &str) -> Result<CallToolResult> {
        let arguments = parse_arguments(arguments)?;
        Ok(self.router.call_tool(name, arguments).await?)
    }

    /// Execute the MCP tool calls in `response` and run one continuation.
    ///
    /// Returns `response` unchanged when it has no tool calls, when none of
    /// them is an MCP tool, or when the continuation fails.
    pub async fn resolve_tool_calls(
        &self,
        request: &ChatCompletionRequest,
        response: ChatCompletionResponse,
    ) -> ChatCompletionResponse {
        let deadline = Instant::now() + self.request_timeout;
        self.resolve_tool_calls_until(request, response, deadline).await
    }

    /// Like [`resolve_tool_calls`](Self::resolve_tool_calls), with tool
    /// execution and the continuation bounded by `deadline`.
    ///
    /// When the deadline passes first, `response` is returned unchanged.
    pub async fn resolve_tool_calls_until(
        &self,
        request: &ChatCompletionRequest,
        response: ChatCompletionResponse,
        deadline: Instant,
    ) -> ChatCompletionResponse {
        if response.tool_calls().is_empty() {
            return response;
        }

        let execution = self.execute_tool_calls(response.tool_calls());
        let results = match tokio::time::timeout_at(deadline, execution).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    calls = response.tool_calls().len(),
                    "request deadline passed during tool execution, returning original response"
                );
                return response;
            }
        };
        if results.is_empty() {
            tracing::debug!(
                calls = response.tool_calls().len(),
                "no MCP tools requested, returning calls to caller"
            );
            return response;
        }

        let mut continuation = request.clone();
        continuation.stream = false;
        continuation.messages.extend(results);
        let prompt = BackendPrompt::from_request(&continuation);

        let completion = self.backend.complete(&prompt);
        let answer = match tokio::time::timeout_at(deadline, completion).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "continuation failed, returning original response");
                return response;
            }
            Err(_) => {
                tracing::warn!(
                    "request deadline passed during continuation, returning original response"
                );
                return response;
            }
        };

        let mut resolved = answer_to_response(&request.model, &answer);
        resolved.id = response.id;
        resolved.created = response.created;
        if !resolved.tool_calls().is_empty() {
            tracing::info!(
                calls = resolved.tool_calls().len(),
                "continuation requested more tools, not executing them"
            );
        }
        resolved
    }

    /// Run every MCP-routed call in order, producing one tool message each.
    ///
    /// Calls to tools no running server advertises are skipped. Failures
    /// become tool messages describing the error.
    pub async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut messages = Vec::new();
        for call in calls {
            let name = call.function.name.as_str();
            if !self.router.is_tool_available(name) {
                tracing::debug!(tool = %name, "skipping non-MCP tool call");
                continue;
            }

            let started = std::time::Instant::now();
            let text = match self.call_tool_directly(name, &call.function.arguments).await {
                Ok(result) => {
                    tracing::info!(
                        tool = %name,
                        call_id = %call.id,
                        is_error = result.is_error(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "tool call completed"
                    );
                    result_text(&result)
                }
                Err(e) => {
                    tracing::warn!(tool = %name, call_id = %call.id, error = %e, "tool call failed");
                    format!("Error: {}", e)
                }
            };
            messages.push(Message::tool(&call.id, text));
        }
        messages
    }
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("backend", &self.backend.name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn parse_arguments(arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments).map_err(|e| AgentError::invalid_arguments(e.to_string()))
}

/// Flatten a tool result into the text of a tool message.
fn result_text(result: &CallToolResult) -> String {
    let mut parts: Vec<String> = Vec::new();
    for content in &result.content {
        match content {
            ToolContent::Text { text } => parts.push(text.clone()),
            ToolContent::Image { mime_type, .. } => parts.push(format!("[Image: {}]", mime_type)),
            ToolContent::Resource { resource } => match &resource.text {
                Some(text) => parts.push(text.clone()),
                None => parts.push(format!("[Resource: {}]", resource.uri)),
            },
            ToolContent::Unknown => {}
        }
    }

    let text = parts.join("\n");
    if result.is_error() && text.is_empty() {
        return "Tool reported a failure".to_string();
    }
    text
}
