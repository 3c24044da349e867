//! Inference backend trait.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::prompt::BackendPrompt;

/// A stream of text deltas from a backend.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'static>>;

/// Trait for text-generation backends.
///
/// A backend takes a system prompt plus a conversation and returns either the
/// final answer text or a stream of partial text. Tool calling is not native:
/// tools are described in the system prompt and requested by the model as an
/// embedded JSON envelope in its text.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run the prompt and return the complete answer text.
    async fn complete(&self, prompt: &BackendPrompt) -> Result<String>;

    /// Run the prompt and stream text deltas as they are produced.
    async fn complete_stream(&self, prompt: &BackendPrompt) -> Result<TextStream>;

    /// Short name for logs and health output.
    fn name(&self) -> &str;

    /// Check that the backend is installed and runnable.
    async fn health_check(&self) -> Result<()>;
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn Backend>;
