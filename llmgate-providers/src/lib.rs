//! Concrete [`llmgate_core::provider::Provider`] clients: OpenAI-compatible
//! (OpenAI, OpenRouter, Qwen), Anthropic, and an in-memory mock for tests.

mod anthropic;
mod mock;
mod openai_compat;
mod utils;

pub use anthropic::AnthropicClient;
pub use mock::MockProvider;
pub use openai_compat::OpenAiCompatClient;
pub use utils::{HttpConfig, SseBuffer};

use std::sync::Arc;

use llmgate_core::adapter::ProviderFactory;
use llmgate_core::config::ProviderConfig;
use llmgate_core::error::Result;
use llmgate_core::provider::{Provider, ProviderKind};

/// The [`ProviderFactory`] this crate supplies to `UnifiedAdapter`,
/// dispatching on [`ProviderKind`] to build a real HTTP-backed client.
///
/// This is the one place `llmgate-core`'s dependency-inverted
/// [`ProviderFactory`] seam gets a concrete, network-capable
/// implementation — everything above this crate only ever talks to
/// `Arc<dyn Provider>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let model = config.model.clone();
        let client: Arc<dyn Provider> = match config.provider {
            ProviderKind::OpenAi => Arc::new(OpenAiCompatClient::new(
                ProviderKind::OpenAi,
                config.api_key.clone(),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                config.timeout,
                model,
            )?),
            ProviderKind::OpenRouter => Arc::new(OpenAiCompatClient::new(
                ProviderKind::OpenRouter,
                config.api_key.clone(),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
                config.timeout,
                model,
            )?),
            ProviderKind::Qwen => Arc::new(OpenAiCompatClient::new(
                ProviderKind::Qwen,
                config.api_key.clone(),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()),
                config.timeout,
                model,
            )?),
            ProviderKind::Anthropic => Arc::new(AnthropicClient::new(
                config.api_key.clone(),
                config.base_url.clone(),
                config.timeout,
                model,
            )?),
        };
        Ok(client)
    }
}

impl HttpProviderFactory {
    /// Build a factory. Stateless today; takes `&self` so call sites read
    /// the same way regardless of whether a future provider needs shared
    /// state (e.g. a pooled client cache).
    pub fn new() -> Self {
        Self
    }
}
