//! Token-bucket rate limiter, keyed by an opaque string (typically a
//! provider tag).
//!
//! Each key gets its own continuously-refilled bucket behind a
//! `DashMap`, so concurrent callers across different keys never contend
//! on a single global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provider::ProviderKind;

/// Per-key rate/burst override.
#[derive(Debug, Clone, Copy)]
pub struct KeyRule {
    /// Tokens replenished per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: f64,
}

/// Result of asking the limiter for permission.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    /// Whether a token was granted immediately
    pub ok: bool,
    /// How long the caller would need to wait for a token if not `ok`
    pub delay: Duration,
    /// The instant at which the reservation would become valid
    pub time_to_act: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
struct BucketStats {
    request_count: u64,
    allowed_count: u64,
    dropped_count: u64,
    window_start: Option<Instant>,
    last_request: Option<Instant>,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
    stats: BucketStats,
}

impl Bucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_refill: Instant::now(),
            stats: BucketStats::default(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn reserve(&mut self) -> Reservation {
        let now = Instant::now();
        self.refill(now);

        self.stats.request_count += 1;
        self.stats.last_request = Some(now);
        if self.stats.window_start.is_none() {
            self.stats.window_start = Some(now);
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.stats.allowed_count += 1;
            Reservation {
                ok: true,
                delay: Duration::ZERO,
                time_to_act: now,
            }
        } else {
            self.stats.dropped_count += 1;
            let missing = 1.0 - self.tokens;
            let delay = Duration::from_secs_f64(missing / self.rate);
            Reservation {
                ok: false,
                delay,
                time_to_act: now + delay,
            }
        }
    }

    fn reset(&mut self) {
        self.tokens = self.capacity;
        self.stats = BucketStats::default();
    }
}

/// Configuration for the limiter as a whole.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Rate applied to keys with no [`KeyRule`] override
    pub default_rate: f64,
    /// Burst applied to keys with no [`KeyRule`] override
    pub default_burst: f64,
    /// How often the sweeper runs
    pub cleanup_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_rate: 10.0,
            default_burst: 20.0,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// A keyed token-bucket rate limiter with lazy bucket creation and
/// background eviction of idle buckets.
pub struct RateLimiter {
    config: LimiterConfig,
    key_rules: DashMap<String, KeyRule>,
    buckets: DashMap<String, Mutex<Bucket>>,
}

impl RateLimiter {
    /// Build a limiter from config and an optional set of per-key overrides.
    pub fn new(config: LimiterConfig, key_rules: impl IntoIterator<Item = (String, KeyRule)>) -> Self {
        let rules = DashMap::new();
        for (k, v) in key_rules {
            rules.insert(k, v);
        }
        Self {
            config,
            key_rules: rules,
            buckets: DashMap::new(),
        }
    }

    fn rule_for(&self, key: &str) -> KeyRule {
        self.key_rules.get(key).map(|r| *r).unwrap_or(KeyRule {
            rate: self.config.default_rate,
            burst: self.config.default_burst,
        })
    }

    /// Ask for one token, refilling first. Every call updates per-key stats
    /// regardless of outcome.
    pub fn reserve(&self, key: &str) -> Reservation {
        // Fast path: bucket already exists.
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.lock().reserve();
        }

        // Double-checked insert: someone may have raced us to create it.
        let rule = self.rule_for(key);
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(rule.rate, rule.burst)));

        self.buckets
            .get(key)
            .expect("just inserted")
            .lock()
            .reserve()
    }

    /// Equivalent to `reserve(key).ok && reserve.delay == 0`.
    pub fn allow(&self, key: &str) -> bool {
        let r = self.reserve(key);
        r.ok && r.delay.is_zero()
    }

    /// If `reserve` isn't immediate, sleep for the computed delay and
    /// re-attempt exactly once. Honors cancellation.
    pub async fn wait(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let first = self.reserve(key);
        if first.ok {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(first.delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        let second = self.reserve(key);
        if second.ok {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded {
                provider: key_to_provider_hint(key),
            })
        }
    }

    /// Restore a bucket to full capacity and clear its stats.
    pub fn reset(&self, key: &str) {
        if let Some(bucket) = self.buckets.get(key) {
            bucket.lock().reset();
        }
    }

    /// Remove buckets that haven't been touched in `2 * cleanup_interval`.
    /// Intended to be driven by a periodic sweeper task.
    pub fn sweep_idle(&self) {
        let threshold = self.config.cleanup_interval * 2;
        let now = Instant::now();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter_map(|entry| {
                let last = entry.value().lock().stats.last_request;
                match last {
                    Some(t) if now.saturating_duration_since(t) > threshold => {
                        Some(entry.key().clone())
                    }
                    None => None,
                    _ => None,
                }
            })
            .collect();

        for key in &stale {
            self.buckets.remove(key);
        }
        if !stale.is_empty() {
            debug!(evicted = stale.len(), "rate limiter: swept idle buckets");
        }
    }

    /// Spawn the background sweeper. The returned handle can be aborted by
    /// the adapter on `update_config`/shutdown.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_idle();
            }
        })
    }
}

/// Best-effort mapping from a rate-limit key back to a provider tag, used
/// only to populate the `provider` field of [`Error::RateLimitExceeded`]
/// for keys that happen to be provider tags (the common case — keys are
/// otherwise arbitrary and opaque, so this falls back to OpenAI rather
/// than failing when the key isn't a recognized tag).
fn key_to_provider_hint(key: &str) -> ProviderKind {
    match key {
        "anthropic" => ProviderKind::Anthropic,
        "openrouter" => ProviderKind::OpenRouter,
        "qwen" => ProviderKind::Qwen,
        _ => ProviderKind::OpenAi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rate: f64, burst: f64) -> RateLimiter {
        RateLimiter::new(
            LimiterConfig {
                default_rate: rate,
                default_burst: burst,
                cleanup_interval: Duration::from_secs(300),
            },
            std::iter::empty(),
        )
    }

    #[test]
    fn burst_then_exhaustion() {
        let l = limiter(2.0, 4.0);
        let mut allowed = 0;
        for _ in 0..6 {
            if l.allow("p") {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 4);
    }

    #[test]
    fn refill_is_continuous_and_clamped() {
        let l = limiter(2.0, 4.0);
        for _ in 0..4 {
            assert!(l.allow("p"));
        }
        assert!(!l.allow("p"));
        std::thread::sleep(Duration::from_millis(1100));
        // ~2 tokens should have refilled after ~1s at rate 2/s.
        assert!(l.allow("p"));
        assert!(l.allow("p"));
        assert!(!l.allow("p"));
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let l = limiter(100.0, 4.0);
        std::thread::sleep(Duration::from_millis(50));
        // Even after "plenty" of refill time, never more than `burst` allowed
        // back-to-back.
        let mut allowed = 0;
        for _ in 0..10 {
            if l.allow("p") {
                allowed += 1;
            }
        }
        assert!(allowed <= 4);
    }

    #[tokio::test]
    async fn wait_resolves_after_delay() {
        let l = limiter(10.0, 1.0);
        assert!(l.allow("p"));
        let cancel = CancellationToken::new();
        l.wait("p", &cancel).await.expect("should acquire after short wait");
    }

    #[tokio::test]
    async fn wait_honors_cancellation() {
        let l = limiter(0.1, 1.0);
        assert!(l.allow("p"));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = l.wait("p", &cancel).await.expect_err("should be cancelled");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn reset_restores_capacity() {
        let l = limiter(1.0, 2.0);
        assert!(l.allow("p"));
        assert!(l.allow("p"));
        assert!(!l.allow("p"));
        l.reset("p");
        assert!(l.allow("p"));
        assert!(l.allow("p"));
    }

    #[test]
    fn sweeper_evicts_idle_buckets() {
        let l = limiter(1.0, 1.0);
        assert!(l.allow("p"));
        assert_eq!(l.buckets.len(), 1);
        {
            let mut bucket = l.buckets.get("p").unwrap().lock();
            bucket.stats.last_request = Some(Instant::now() - Duration::from_secs(10_000));
        }
        l.sweep_idle();
        assert_eq!(l.buckets.len(), 0);
    }
}
