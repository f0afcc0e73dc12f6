//! Cross-provider failover: candidate ordering and the loop that drives a
//! request through them, retrying within each candidate before moving to
//! the next.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::metrics::ProviderMetrics;
use crate::provider::{GenerateRequest, GenerateResponse, Provider, ProviderKind};
use crate::retry::{retry, RetryPolicy};
use crate::status::StatusTracker;

/// How candidates beyond the primary are chosen and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverStrategy {
    /// Only the primary is tried; a primary failure surfaces directly.
    None,
    /// Fixed order: primary, then configured fallbacks in their listed order.
    Automatic,
    /// The budget provider (if any) is tried first, then primary, then
    /// fallbacks — cheapest first.
    CostBased,
    /// Candidates after the primary are sorted by last observed latency,
    /// ascending; the primary always goes first regardless of its own
    /// latency.
    SpeedBased,
}

/// One entry in the ordered candidate list the failover loop walks.
pub struct Candidate {
    /// The client to call
    pub provider: Arc<dyn Provider>,
    /// That provider's breaker
    pub breaker: Arc<CircuitBreaker>,
    /// That provider's health/latency tracker
    pub status: Arc<StatusTracker>,
    /// That provider's running token/cost counters
    pub metrics: Arc<ProviderMetrics>,
    /// Price per 1000 tokens, if configured, used to cost successful calls
    pub cost_per_1k: Option<f64>,
    /// Rate-limiter key this candidate reserves tokens under
    pub limiter_key: String,
}

/// Build the ordered candidate list for one request, given the strategy and
/// the full registered set. `primary` is always index 0 of `all` by
/// convention of the caller (`UnifiedAdapter`).
pub fn order_candidates(strategy: FailoverStrategy, all: &[Candidate]) -> Vec<usize> {
    match strategy {
        FailoverStrategy::None => {
            if all.is_empty() {
                Vec::new()
            } else {
                vec![0]
            }
        }
        FailoverStrategy::Automatic => (0..all.len()).collect(),
        FailoverStrategy::CostBased => {
            // Caller arranges `all` as [primary, budget?, fallback...] when
            // constructing the candidate list for this strategy, so a plain
            // identity order already puts budget ahead of primary. See
            // `UnifiedAdapter::candidates_for` for the arrangement.
            (0..all.len()).collect()
        }
        FailoverStrategy::SpeedBased => {
            if all.is_empty() {
                return Vec::new();
            }
            let mut rest: Vec<usize> = (1..all.len()).collect();
            rest.sort_by_key(|&i| {
                all[i]
                    .status
                    .snapshot()
                    .last_latency
                    .unwrap_or(std::time::Duration::MAX)
            });
            let mut order = vec![0];
            order.extend(rest);
            order
        }
    }
}

/// Run a request through the ordered candidates: each candidate is gated by
/// its breaker and the shared rate limiter, executed under `retry_policy`
/// via [`crate::retry::retry`], and its outcome recorded against both its
/// breaker and its status tracker. The first success wins; if every
/// candidate is skipped or fails, the last non-skipped failure is returned
/// wrapped in [`Error::AllProvidersFailed`].
pub async fn run_failover(
    order: &[usize],
    candidates: &[Candidate],
    request: &GenerateRequest,
    retry_policy: &RetryPolicy,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
) -> Result<GenerateResponse> {
    let mut last_err: Option<Error> = None;

    for &idx in order {
        let candidate = &candidates[idx];
        let kind = candidate.provider.provider();

        if !candidate.breaker.can_execute() {
            info!(provider = %kind, "failover: skipping, circuit open");
            last_err.get_or_insert(Error::CircuitOpen { provider: kind });
            continue;
        }

        candidate.status.start_request();
        let started = std::time::Instant::now();

        let result = retry(retry_policy, cancel, || async {
            limiter.wait(&candidate.limiter_key, cancel).await?;
            candidate.provider.generate(request).await
        })
        .await;

        match result {
            Ok(response) => {
                candidate.breaker.record_success();
                candidate.status.record_success(started.elapsed());
                candidate
                    .metrics
                    .record_success(response.usage, started.elapsed(), candidate.cost_per_1k);
                return Ok(response);
            }
            Err(Error::Cancelled) => {
                // Cancellation is not a provider failure: no breaker/metrics
                // accounting, and it surfaces to the caller unwrapped rather than
                // folded into `AllProvidersFailed`. Undo the in-flight bookkeeping
                // `start_request` set up so status snapshots don't leak a
                // permanently outstanding request.
                candidate.status.cancel_request();
                return Err(Error::Cancelled);
            }
            Err(err) => {
                warn!(provider = %kind, error = %err, "failover: candidate failed");
                candidate.breaker.record_failure();
                candidate.status.record_failure(err.to_string());
                candidate.metrics.record_failure();
                last_err = Some(err);
            }
        }
    }

    Err(Error::AllProvidersFailed {
        cause: Box::new(last_err.unwrap_or(Error::CircuitOpen {
            provider: ProviderKind::OpenAi,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use crate::limiter::LimiterConfig;
    use crate::message::Message;
    use crate::provider::Usage;
    use crate::streaming::StreamingResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        kind: ProviderKind,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::ProviderHttp {
                    status: 503,
                    body_head: "unavailable".into(),
                });
            }
            Ok(GenerateResponse {
                id: "resp-1".into(),
                created: 0,
                model: "test-model".into(),
                choices: vec![crate::provider::Choice {
                    index: 0,
                    finish_reason: "stop".into(),
                    message: Message::assistant("ok"),
                    tool_calls: vec![],
                }],
                usage: Usage::new(1, 1),
            })
        }

        async fn generate_streaming(&self, _request: &GenerateRequest) -> Result<StreamingResponse> {
            unimplemented!("not exercised in these tests")
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        fn provider(&self) -> ProviderKind {
            self.kind
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn candidate(kind: ProviderKind, fail_times: u32) -> Candidate {
        Candidate {
            provider: Arc::new(ScriptedProvider {
                kind,
                fail_times: AtomicU32::new(fail_times),
            }),
            breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 5,
                open_timeout: std::time::Duration::from_secs(30),
            })),
            status: Arc::new(StatusTracker::new()),
            metrics: Arc::new(ProviderMetrics::default()),
            cost_per_1k: None,
            limiter_key: kind.as_str().to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    fn unlimited() -> RateLimiter {
        RateLimiter::new(
            LimiterConfig {
                default_rate: 1_000.0,
                default_burst: 1_000.0,
                cleanup_interval: std::time::Duration::from_secs(300),
            },
            std::iter::empty(),
        )
    }

    fn req() -> GenerateRequest {
        GenerateRequest::new(vec![])
    }

    #[tokio::test]
    async fn falls_over_to_second_candidate_after_first_exhausts_retries() {
        let candidates = vec![
            candidate(ProviderKind::OpenAi, 10), // always fails
            candidate(ProviderKind::Anthropic, 0), // succeeds immediately
        ];
        let order = order_candidates(FailoverStrategy::Automatic, &candidates);
        let cancel = CancellationToken::new();
        let result = run_failover(&order, &candidates, &req(), &fast_retry(), &unlimited(), &cancel).await;
        assert!(result.is_ok());
        assert_eq!(candidates[0].breaker.state(), crate::breaker::CircuitState::Closed);
    }

    #[tokio::test]
    async fn skips_open_circuit_candidate() {
        let candidates = vec![candidate(ProviderKind::OpenAi, 0), candidate(ProviderKind::Anthropic, 0)];
        for _ in 0..5 {
            candidates[0].breaker.record_failure();
        }
        assert_eq!(candidates[0].breaker.state(), crate::breaker::CircuitState::Open);

        let order = order_candidates(FailoverStrategy::Automatic, &candidates);
        let cancel = CancellationToken::new();
        let result = run_failover(&order, &candidates, &req(), &fast_retry(), &unlimited(), &cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn none_strategy_never_tries_fallback() {
        let candidates = vec![candidate(ProviderKind::OpenAi, 10), candidate(ProviderKind::Anthropic, 0)];
        let order = order_candidates(FailoverStrategy::None, &candidates);
        let cancel = CancellationToken::new();
        let result = run_failover(&order, &candidates, &req(), &fast_retry(), &unlimited(), &cancel).await;
        assert!(result.is_err());
    }

    #[test]
    fn speed_based_keeps_primary_first_and_sorts_rest_by_latency() {
        let candidates = vec![
            candidate(ProviderKind::OpenAi, 0),
            candidate(ProviderKind::Anthropic, 0),
            candidate(ProviderKind::OpenRouter, 0),
        ];
        candidates[1]
            .status
            .record_success(std::time::Duration::from_millis(500));
        candidates[2]
            .status
            .record_success(std::time::Duration::from_millis(50));

        let order = order_candidates(FailoverStrategy::SpeedBased, &candidates);
        assert_eq!(order, vec![0, 2, 1]);
    }
}
