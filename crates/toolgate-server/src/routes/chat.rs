//! OpenAI-compatible chat completions.
//!
//! The MCP catalog is appended to the request's tools before the backend is
//! asked. Non-streaming answers go through tool-call extraction and, when an
//! MCP tool was requested, one continuation round. Streaming answers are
//! relayed as `chat.completion.chunk` events without tool execution.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use toolgate_agent::answer_to_response;
use toolgate_llm::BackendPrompt;
use toolgate_types::{
    ChatCompletionChunk, ChatCompletionRequest, ErrorResponse, FinishReason, completion_id,
};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// POST /v1/chat/completions
pub async fn chat_completions_handler(
    State(state): State<AppState>,
    Json(mut request): Json<ChatCompletionRequest>,
) -> Result<Response> {
    if request.messages.is_empty() {
        return Err(ServerError::invalid_request(
            "invalid_messages",
            "messages must not be empty",
        ));
    }
    append_mcp_tools(&state, &mut request);

    if request.stream {
        return Ok(stream_completion(state, request).into_response());
    }

    let prompt = BackendPrompt::from_request(&request);
    tracing::debug!(
        model = %request.model,
        messages = prompt.messages.len(),
        tools = request.tools.len(),
        "Running completion"
    );

    // One deadline covers the first completion, tool execution and the
    // continuation.
    let timeout = state.config.request_timeout;
    let deadline = tokio::time::Instant::now() + timeout;
    let answer = tokio::time::timeout_at(deadline, state.backend.complete(&prompt))
        .await
        .map_err(|_| {
            ServerError::Timeout(format!("backend did not answer within {}s", timeout.as_secs()))
        })??;

    let response = answer_to_response(&request.model, &answer);
    let response = state
        .orchestrator
        .resolve_tool_calls_until(&request, response, deadline)
        .await;
    Ok(Json(response).into_response())
}

/// Advertise every MCP tool the request does not already define.
fn append_mcp_tools(state: &AppState, request: &mut ChatCompletionRequest) {
    for tool in state.mcp.tools_as_openai() {
        let defined = request
            .tools
            .iter()
            .any(|t| t.function.name == tool.function.name);
        if !defined {
            request.tools.push(tool);
        }
    }
}

fn stream_completion(
    state: AppState,
    request: ChatCompletionRequest,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = completion_id();
    let model = request.model.clone();
    let prompt = BackendPrompt::from_request(&request);
    let backend = state.backend.clone();
    let timeout = state.config.request_timeout;

    let stream = async_stream::stream! {
        let deadline = tokio::time::Instant::now() + timeout;
        yield Ok(chunk_event(&ChatCompletionChunk::role(&id, &model)));

        let error = match tokio::time::timeout_at(deadline, backend.complete_stream(&prompt)).await {
            Ok(Ok(mut deltas)) => loop {
                match tokio::time::timeout_at(deadline, deltas.next()).await {
                    Ok(Some(Ok(text))) => {
                        if !text.is_empty() {
                            yield Ok(chunk_event(&ChatCompletionChunk::content(&id, &model, text)));
                        }
                    }
                    Ok(Some(Err(e))) => break Some(ServerError::from(e)),
                    Ok(None) => break None,
                    Err(_) => break Some(stream_timeout(timeout)),
                }
            },
            Ok(Err(e)) => Some(ServerError::from(e)),
            Err(_) => Some(stream_timeout(timeout)),
        };

        match error {
            None => yield Ok(chunk_event(&ChatCompletionChunk::finish(&id, &model, FinishReason::Stop))),
            Some(e) => {
                tracing::warn!(error = %e, "Streaming completion failed");
                yield Ok(error_event(&e.to_body()));
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn stream_timeout(timeout: std::time::Duration) -> ServerError {
    ServerError::Timeout(format!("backend did not finish within {}s", timeout.as_secs()))
}

fn chunk_event(chunk: &ChatCompletionChunk) -> Event {
    Event::default()
        .json_data(chunk)
        .unwrap_or_else(|_| Event::default())
}

fn error_event(body: &ErrorResponse) -> Event {
    Event::default()
        .json_data(body)
        .unwrap_or_else(|_| Event::default())
}
