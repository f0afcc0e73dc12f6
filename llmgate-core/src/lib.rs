//! Provider-agnostic core of the unified LLM gateway: a single façade in
//! front of OpenAI-, Anthropic- and OpenAI-compatible chat completion
//! endpoints, with per-provider circuit breaking, token-bucket rate
//! limiting, bounded retry with backoff, and cross-provider failover.
//!
//! See [`adapter::UnifiedAdapter`] for the entry point most applications
//! hold; [`prelude`] re-exports the types that entry point's API surface
//! touches.

pub mod adapter;
pub mod breaker;
pub mod config;
pub mod error;
pub mod failover;
pub mod limiter;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod provider;
pub mod retry;
pub mod status;
pub mod streaming;

/// Re-exports of the commonly needed types.
///
/// ```
/// use llmgate_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adapter::{ProviderFactory, UnifiedAdapter};
    pub use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::config::{AdapterConfig, ProviderConfig};
    pub use crate::error::{Error, Result};
    pub use crate::failover::FailoverStrategy;
    pub use crate::limiter::{KeyRule, RateLimiter, Reservation};
    pub use crate::message::{Content, ContentPart, Message, Role, ToolCall, ToolDefinition};
    pub use crate::metrics::AdapterMetrics;
    pub use crate::provider::{GenerateRequest, GenerateResponse, Provider, ProviderKind};
    pub use crate::retry::RetryPolicy;
    pub use crate::status::ProviderStatus;
    pub use crate::streaming::{StreamingChoice, StreamingResponse};
}
