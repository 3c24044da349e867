//! Inference backend boundary for Toolgate.
//!
//! The gateway only needs "run a prompt, get text or a token stream" from a
//! backend. The [`Backend`] trait captures that contract; [`ClaudeCliBackend`]
//! implements it by driving the Claude CLI.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Backend trait                          │
//! │  - complete() -> String                 │
//! │  - complete_stream() -> Stream<String>  │
//! └─────────────────────────────────────────┘
//!                    │
//!          ┌─────────┴──────────┐
//!          ▼                    ▼
//! ┌──────────────────┐   ┌─────────────┐
//! │ ClaudeCliBackend │   │ MockBackend │
//! └──────────────────┘   └─────────────┘
//! ```
//!
//! Tools are not passed natively. [`BackendPrompt::from_request`] renders
//! them into the system prompt, and the model answers with an embedded
//! `{"tool_calls":[...]}` envelope.

pub mod backend;
pub mod claude_cli;
pub mod error;
pub mod prompt;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use backend::{Backend, SharedBackend, TextStream};
pub use claude_cli::{ClaudeCliBackend, ClaudeCliConfig, DEFAULT_COMMAND};
pub use error::{LlmError, Result};
pub use prompt::{BackendPrompt, render_tools_prompt};

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockBackend, MockReply};
