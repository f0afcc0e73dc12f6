//! The `Provider` trait and the provider-agnostic request/response shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, ToolCall, ToolDefinition};
use crate::streaming::StreamingResponse;

/// Which backend family a [`Provider`] speaks to.
///
/// OpenRouter and Qwen are wire-identical to OpenAI, so they share the
/// `OpenAiCompatClient` in `llmgate-providers`, only distinguished here so
/// config, metrics and logging can name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat-completions endpoint
    OpenAi,
    /// Anthropic Claude's messages API
    Anthropic,
    /// OpenRouter (and K2 models routed through it)
    OpenRouter,
    /// Qwen's OpenAI-compatible endpoint
    Qwen,
}

impl ProviderKind {
    /// Stable tag used in config, logs and metrics keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::OpenRouter => "openrouter",
            Self::Qwen => "qwen",
        }
    }

    /// The model this gateway defaults to for a provider when no override
    /// is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::OpenRouter => "liquid/lfm-40b",
            Self::Qwen => "qwen2.5-72b-instruct",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Conversation history, in order
    pub messages: Vec<Message>,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
    /// Model override; when absent the provider's configured model is used
    pub model: Option<String>,
    /// Sampling temperature, expected in `[0, 2]`
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u64>,
    /// Nucleus sampling parameter
    pub top_p: Option<f64>,
    /// Whether the caller intends to stream (informational; `generate` vs
    /// `generate_streaming` is still the caller's explicit choice of method)
    pub stream: bool,
    /// Free-form routing hints, untouched by the core
    pub metadata: serde_json::Value,
}

impl GenerateRequest {
    /// Start a request from a message list, leaving everything else default.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            metadata: serde_json::Value::Null,
            ..Default::default()
        }
    }

    /// Validate request-level invariants the adapter must enforce before
    /// dispatching to any provider: temperature in `[0,2]`, max_tokens
    /// positive.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(crate::error::Error::config_invalid(format!(
                    "temperature must be within [0, 2], got {t}"
                )));
            }
        }
        if let Some(mt) = self.max_tokens {
            if mt == 0 {
                return Err(crate::error::Error::config_invalid(
                    "max_tokens must be positive",
                ));
            }
        }
        Ok(())
    }
}

/// Token accounting for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u64,
    /// Tokens produced by the completion
    pub completion_tokens: u64,
    /// Sum of the two
    pub total_tokens: u64,
}

impl Usage {
    /// Build usage from the two measured components, computing the total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One completion choice.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Index within the response's choice list
    pub index: u32,
    /// Why generation stopped (provider-specific string, normalized where
    /// the wire format gives us one: `"stop"`, `"length"`, `"tool_calls"`, ...)
    pub finish_reason: String,
    /// The assistant message produced
    pub message: Message,
    /// Tool calls nested in this choice, if any
    pub tool_calls: Vec<ToolCall>,
}

/// A normalized completion response, regardless of backend.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Provider-assigned response id
    pub id: String,
    /// Unix timestamp of creation
    pub created: i64,
    /// The model that actually served the request
    pub model: String,
    /// Completion choices, in provider order
    pub choices: Vec<Choice>,
    /// Token usage for the call
    pub usage: Usage,
}

impl GenerateResponse {
    /// Convenience accessor for the first choice's text, the common case.
    pub fn text(&self) -> String {
        self.choices
            .first()
            .map(|c| c.message.text())
            .unwrap_or_default()
    }
}

/// Trait implemented by one client per provider family.
///
/// Implementors translate [`GenerateRequest`] into the provider's wire
/// shape, drive the HTTP exchange under the configured timeout, and
/// normalize the response back into [`GenerateResponse`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run a single (non-streaming) completion.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;

    /// Run a streaming completion, returning a lazy chunk sequence.
    async fn generate_streaming(&self, request: &GenerateRequest) -> Result<StreamingResponse>;

    /// Cheap liveness probe used by `provider_status`.
    async fn health_check(&self) -> Result<()>;

    /// Which provider family this client speaks to.
    fn provider(&self) -> ProviderKind;

    /// The model this client is configured with.
    fn model(&self) -> &str;
}
