//! Scripted backend for tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{Backend, TextStream};
use crate::error::{LlmError, Result};
use crate::prompt::BackendPrompt;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this text.
    Text(String),
    /// Fail with an invalid-output error carrying this message.
    Fail(String),
}

/// A backend that returns pre-configured replies in order and records every
/// prompt it receives.
#[derive(Debug)]
pub struct MockBackend {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<BackendPrompt>>,
    delay: Option<Duration>,
    healthy: bool,
}

impl MockBackend {
    /// Create a mock that answers with `texts` in order.
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(texts.into_iter().map(|t| MockReply::Text(t.into())))
    }

    /// Create a mock from scripted replies.
    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
            healthy: true,
        }
    }

    /// Create a mock with a single text reply.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new([text.into()])
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `health_check` fail.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<BackendPrompt> {
        self.prompts.lock().clone()
    }

    /// Number of completions requested.
    pub fn request_count(&self) -> usize {
        self.prompts.lock().len()
    }

    async fn next_reply(&self, prompt: &BackendPrompt) -> Result<String> {
        self.prompts.lock().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(message)) => Err(LlmError::invalid_output(message)),
            None => Err(LlmError::invalid_output(
                "MockBackend: no more responses available",
            )),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, prompt: &BackendPrompt) -> Result<String> {
        self.next_reply(prompt).await
    }

    async fn complete_stream(&self, prompt: &BackendPrompt) -> Result<TextStream> {
        let text = self.next_reply(prompt).await?;
        // Split on word boundaries, keeping the whitespace with each piece.
        let mut chunks: Vec<Result<String>> = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            current.push(ch);
            if ch == ' ' {
                chunks.push(Ok(std::mem::take(&mut current)));
            }
        }
        if !current.is_empty() {
            chunks.push(Ok(current));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn name(&self) -> &str {
        "mock"
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(LlmError::spawn("mock backend marked unhealthy"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replies_in_order() {
        let backend = MockBackend::new(["First", "Second"]);
        let prompt = BackendPrompt::user("hi");

        assert_eq!(backend.complete(&prompt).await.unwrap(), "First");
        assert_eq!(backend.complete(&prompt).await.unwrap(), "Second");
        assert!(backend.complete(&prompt).await.is_err());
        assert_eq!(backend.request_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let backend = MockBackend::with_replies([MockReply::Fail("boom".to_string())]);
        let err = backend.complete(&BackendPrompt::user("hi")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_stream_splits_words() {
        let backend = MockBackend::with_text("Hello big world");
        let stream = backend
            .complete_stream(&BackendPrompt::user("hi"))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, ["Hello ", "big ", "world"]);
        assert_eq!(chunks.concat(), "Hello big world");
    }

    #[tokio::test]
    async fn test_records_prompts_and_health() {
        let backend = MockBackend::with_text("ok").unhealthy();
        backend.complete(&BackendPrompt::user("question")).await.unwrap();
        assert_eq!(
            backend.prompts()[0].last_user_text().as_deref(),
            Some("question")
        );
        assert!(backend.health_check().await.is_err());
    }
}
