//! Adapter-wide metrics aggregated from each provider's [`StatusTracker`]
//! plus a running token/cost tally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::provider::{ProviderKind, Usage};
use crate::status::ProviderStatus;

/// Running token, latency and cost counters for one provider, updated
/// after every completed call.
#[derive(Default)]
pub struct ProviderMetrics {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    requests: AtomicU64,
    failures: AtomicU64,
    /// Sum of successful-call latencies in microseconds, to derive a
    /// running mean without storing a history.
    latency_micros_sum: AtomicU64,
    /// Cost accumulated so far, stored as micro-dollars to stay lock-free
    /// and exact under concurrent updates.
    cost_micros: AtomicU64,
}

impl ProviderMetrics {
    /// Record a successful call's usage and latency, pricing it at
    /// `cost_per_1k` if known.
    pub fn record_success(&self, usage: Usage, latency: Duration, cost_per_1k: Option<f64>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.latency_micros_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);

        if let Some(rate) = cost_per_1k {
            let cost = (usage.total_tokens as f64 / 1000.0) * rate;
            self.cost_micros
                .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        }
    }

    /// Record a failed call (no usage to attribute).
    pub fn record_failure(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters into an owned, displayable struct.
    pub fn snapshot(&self) -> ProviderMetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let successes = requests.saturating_sub(failures);
        let avg_latency = if successes > 0 {
            Some(Duration::from_micros(
                self.latency_micros_sum.load(Ordering::Relaxed) / successes,
            ))
        } else {
            None
        };
        ProviderMetricsSnapshot {
            requests,
            failures,
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            average_latency: avg_latency,
            estimated_cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// An immutable point-in-time read of a provider's accumulated metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderMetricsSnapshot {
    /// Total calls attempted (success + failure)
    pub requests: u64,
    /// Calls that ended in an error
    pub failures: u64,
    /// Prompt tokens consumed across all successful calls
    pub prompt_tokens: u64,
    /// Completion tokens produced across all successful calls
    pub completion_tokens: u64,
    /// Running mean latency across successful calls, absent until the
    /// first success
    pub average_latency: Option<Duration>,
    /// Running cost estimate in USD, derived from `cost_per_1k`
    pub estimated_cost_usd: f64,
}

impl ProviderMetricsSnapshot {
    /// Total prompt + completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Fraction of requests that succeeded, in `[0, 1]`; `1.0` when no
    /// requests have been made yet.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            (self.requests - self.failures) as f64 / self.requests as f64
        }
    }
}

/// Metrics for every configured provider, keyed by kind, plus the
/// cross-provider rollups `metrics()` exposes to callers.
#[derive(Debug, Clone)]
pub struct AdapterMetrics {
    /// Per-provider snapshots, in the adapter's configured candidate order
    pub providers: Vec<(ProviderKind, ProviderMetricsSnapshot)>,
    /// Per-provider health, refreshed the same moment these metrics were taken
    pub statuses: Vec<(ProviderKind, ProviderStatus)>,
    /// When this snapshot was assembled
    pub last_updated: DateTime<Utc>,
}

impl AdapterMetrics {
    /// Total cost estimate across every provider.
    pub fn total_cost_usd(&self) -> f64 {
        self.providers.iter().map(|(_, m)| m.estimated_cost_usd).sum()
    }

    /// Total requests across every provider.
    pub fn total_requests(&self) -> u64 {
        self.providers.iter().map(|(_, m)| m.requests).sum()
    }

    /// Total prompt + completion tokens across every provider.
    pub fn total_tokens(&self) -> u64 {
        self.providers.iter().map(|(_, m)| m.total_tokens()).sum()
    }

    /// Overall success rate across every provider's requests.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 1.0;
        }
        let failures: u64 = self.providers.iter().map(|(_, m)| m.failures).sum();
        (total - failures) as f64 / total as f64
    }

    /// Running mean latency across every provider's successful calls.
    pub fn average_latency(&self) -> Option<Duration> {
        let (sum, count) = self
            .providers
            .iter()
            .filter_map(|(_, m)| m.average_latency.map(|d| (d.as_micros() as u64, 1u64)))
            .fold((0u64, 0u64), |(sa, ca), (s, c)| (sa + s, ca + c));
        if count == 0 {
            None
        } else {
            Some(Duration::from_micros(sum / count))
        }
    }
}
