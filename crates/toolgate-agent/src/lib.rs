//! Tool-call handling for Toolgate.
//!
//! Text-only backends request tools by writing a `{"tool_calls":[...]}`
//! envelope into their answer. This crate finds that envelope
//! ([`extract_tool_calls`]), runs the MCP-routed calls, and drives one
//! continuation round with the results ([`ToolOrchestrator`]).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolgate_agent::{ToolOrchestrator, answer_to_response};
//!
//! let orchestrator = ToolOrchestrator::new(Arc::new(manager), backend.clone());
//! let answer = backend.complete(&prompt).await?;
//! let response = answer_to_response(&request.model, &answer);
//! let response = orchestrator.resolve_tool_calls(&request, response).await;
//! ```

pub mod error;
pub mod extract;
pub mod orchestrator;

pub use error::{AgentError, Result};
pub use extract::{ENVELOPE_KEY, Extraction, answer_to_response, extract_tool_calls};
pub use orchestrator::{DEFAULT_REQUEST_TIMEOUT, ToolOrchestrator};
