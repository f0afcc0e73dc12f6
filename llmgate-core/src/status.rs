//! Per-provider health status, fed by the adapter's bookkeeping and
//! consumed both by `provider_status()` and by `speedBased` ordering.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A snapshot of one provider's observed health.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    /// Whether the provider's breaker currently allows execution
    pub available: bool,
    /// Last observed round-trip latency
    pub last_latency: Option<Duration>,
    /// Windowed error rate in `[0, 1]`
    pub error_rate: f64,
    /// Text of the last error seen, if any
    pub last_error: Option<String>,
    /// When the last error occurred
    pub last_error_at: Option<Instant>,
    /// Requests currently in flight against this provider
    pub outstanding_requests: u64,
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self {
            available: true,
            last_latency: None,
            error_rate: 0.0,
            last_error: None,
            last_error_at: None,
            outstanding_requests: 0,
        }
    }
}

/// Mutable tracker backing a [`ProviderStatus`] snapshot, updated on every
/// call. Error rate is an EWMA over outcomes (1.0 = failure, 0.0 = success)
/// with the smoothing factor below.
pub struct StatusTracker {
    inner: Mutex<ProviderStatus>,
}

const ERROR_RATE_SMOOTHING: f64 = 0.2;

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    /// A tracker starting from the default (available, no history) status.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProviderStatus::default()),
        }
    }

    /// Read a snapshot.
    pub fn snapshot(&self) -> ProviderStatus {
        self.inner.lock().clone()
    }

    /// Mark a request as started.
    pub fn start_request(&self) {
        self.inner.lock().outstanding_requests += 1;
    }

    /// Record a successful call with its latency.
    pub fn record_success(&self, latency: Duration) {
        let mut s = self.inner.lock();
        s.outstanding_requests = s.outstanding_requests.saturating_sub(1);
        s.last_latency = Some(latency);
        s.error_rate = (1.0 - ERROR_RATE_SMOOTHING) * s.error_rate;
        s.available = true;
    }

    /// Record a failed call.
    pub fn record_failure(&self, error_text: impl Into<String>) {
        let mut s = self.inner.lock();
        s.outstanding_requests = s.outstanding_requests.saturating_sub(1);
        s.error_rate = (1.0 - ERROR_RATE_SMOOTHING) * s.error_rate + ERROR_RATE_SMOOTHING;
        s.last_error = Some(error_text.into());
        s.last_error_at = Some(Instant::now());
    }

    /// Update the `available` flag from the provider's circuit breaker.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    /// Undo the effect of `start_request` without recording a success or
    /// failure outcome, for a request that was cancelled before either was
    /// known.
    pub fn cancel_request(&self) {
        let mut s = self.inner.lock();
        s.outstanding_requests = s.outstanding_requests.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_success_and_failure() {
        let t = StatusTracker::new();
        t.start_request();
        t.record_success(Duration::from_millis(120));
        let s = t.snapshot();
        assert_eq!(s.outstanding_requests, 0);
        assert_eq!(s.last_latency, Some(Duration::from_millis(120)));
        assert!((s.error_rate - 0.0).abs() < f64::EPSILON);

        t.start_request();
        t.record_failure("boom");
        let s = t.snapshot();
        assert!(s.error_rate > 0.0);
        assert_eq!(s.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_request_undoes_start_without_recording_an_outcome() {
        let t = StatusTracker::new();
        t.start_request();
        t.cancel_request();
        let s = t.snapshot();
        assert_eq!(s.outstanding_requests, 0);
        assert_eq!(s.error_rate, 0.0);
        assert!(s.last_error.is_none());
    }
}
