//! Shared types for the Toolgate gateway.
//!
//! The chat types mirror the OpenAI chat-completions wire format closely
//! enough that existing OpenAI clients can talk to the gateway unchanged.

pub mod ids;
pub mod openai;

pub use ids::{completion_id, tool_call_id};
pub use openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    ContentPart, Delta, ErrorDetail, ErrorResponse, FinishReason, FunctionCall,
    FunctionDefinition, ImageUrl, Message, MessageContent, Role, Tool, ToolCall, Usage,
};
