//! Testing utilities.
//!
//! [`MockGenerationAdapter`] returns scripted responses and records every
//! request it receives, so callers can assert on call counts without any
//! network access.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{GenerationError, Result};
use crate::types::{GenerationRequest, GenerationResponse};
use crate::GenerationAdapter;

/// A scripted outcome for one `generate` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this raw body
    Body(Value),
    /// Fail as if the backend were down
    Unavailable(String),
}

/// Record of a call made to the mock adapter.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub model: String,
    pub prompt: String,
    pub image_count: usize,
}

/// Scripted generation adapter for tests.
#[derive(Clone, Default)]
pub struct MockGenerationAdapter {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    fallback: Arc<Mutex<Option<MockReply>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    unconfigured: bool,
    delay: Option<Duration>,
}

impl MockGenerationAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw body for the next call.
    pub fn with_body(self, body: Value) -> Self {
        self.push(MockReply::Body(body));
        self
    }

    /// Queue a chat-completion style text answer.
    pub fn with_text(self, text: &str) -> Self {
        self.with_body(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        }))
    }

    /// Queue an upstream failure.
    pub fn with_unavailable(self, reason: &str) -> Self {
        self.push(MockReply::Unavailable(reason.to_string()));
        self
    }

    /// Reply used once the queue is empty.
    pub fn with_default_reply(self, reply: MockReply) -> Self {
        *self.fallback.lock().unwrap() = Some(reply);
        self
    }

    /// Behave as if no credential were configured.
    pub fn unconfigured(mut self) -> Self {
        self.unconfigured = true;
        self
    }

    /// Sleep before replying (for concurrency tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Number of `generate` calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationAdapter for MockGenerationAdapter {
    fn ensure_configured(&self) -> Result<()> {
        if self.unconfigured {
            return Err(GenerationError::Configuration(
                "generation API key is not configured".into(),
            ));
        }
        Ok(())
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        self.ensure_configured()?;

        self.calls.lock().unwrap().push(MockCall {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            image_count: request.attached_images.len(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| MockReply::Unavailable("no scripted reply".into())),
        };

        match reply {
            MockReply::Body(body) => Ok(GenerationResponse::from_raw(body)),
            MockReply::Unavailable(reason) => Err(GenerationError::UpstreamUnavailable(reason)),
        }
    }
}
