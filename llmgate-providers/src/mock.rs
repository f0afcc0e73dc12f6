//! An in-memory provider for exercising the adapter, breaker, limiter and
//! failover logic without a network round trip.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use llmgate_core::error::{Error, Result};
use llmgate_core::message::Message;
use llmgate_core::provider::{Choice, GenerateRequest, GenerateResponse, Provider, ProviderKind, Usage};
use llmgate_core::streaming::{MockStreamBuilder, StreamingResponse};

/// A scripted response, optionally preceded by a fixed number of failures —
/// lets a single test drive through breaker/retry/failover behavior.
pub struct MockProvider {
    kind: ProviderKind,
    model: String,
    response_text: String,
    fail_before_success: AtomicU32,
}

impl MockProvider {
    /// Always succeed with `response_text`.
    pub fn new(kind: ProviderKind, model: impl Into<String>, response_text: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            response_text: response_text.into(),
            fail_before_success: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls with a retryable transport error, then
    /// succeed with `response_text` on every call after.
    pub fn failing_then_succeeding(
        kind: ProviderKind,
        model: impl Into<String>,
        response_text: impl Into<String>,
        n: u32,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            response_text: response_text.into(),
            fail_before_success: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
        if self.fail_before_success.load(Ordering::SeqCst) > 0 {
            self.fail_before_success.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ProviderTransport("mock: scripted failure".into()));
        }

        Ok(GenerateResponse {
            id: "mock-response".into(),
            created: 0,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                finish_reason: "stop".into(),
                message: Message::assistant(self.response_text.clone()),
                tool_calls: vec![],
            }],
            usage: Usage::new(0, 0),
        })
    }

    async fn generate_streaming(&self, _request: &GenerateRequest) -> Result<StreamingResponse> {
        if self.fail_before_success.load(Ordering::SeqCst) > 0 {
            self.fail_before_success.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ProviderTransport("mock: scripted failure".into()));
        }

        let mut builder = MockStreamBuilder::new();
        for chunk in self
            .response_text
            .chars()
            .collect::<Vec<_>>()
            .chunks(10)
            .map(|c| c.iter().collect::<String>())
        {
            builder = builder.message(chunk);
        }
        Ok(builder.done().build())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn provider(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds_by_default() {
        let provider = MockProvider::new(ProviderKind::OpenAi, "test-model", "Hello, world!");
        let response = provider
            .generate(&GenerateRequest::new(vec![Message::user("hi")]))
            .await
            .expect("should succeed");
        assert_eq!(response.text(), "Hello, world!");
    }

    #[tokio::test]
    async fn fails_scripted_number_of_times_then_succeeds() {
        let provider = MockProvider::failing_then_succeeding(ProviderKind::OpenAi, "m", "ok", 2);
        let req = GenerateRequest::new(vec![]);
        assert!(provider.generate(&req).await.is_err());
        assert!(provider.generate(&req).await.is_err());
        assert!(provider.generate(&req).await.is_ok());
    }

    #[tokio::test]
    async fn streaming_splits_response_into_chunks() {
        let provider = MockProvider::new(ProviderKind::Anthropic, "m", "Hello, world!");
        let stream = provider
            .generate_streaming(&GenerateRequest::new(vec![]))
            .await
            .expect("should succeed");
        let text = stream.collect_text().await.expect("collect should succeed");
        assert_eq!(text, "Hello, world!");
    }
}
