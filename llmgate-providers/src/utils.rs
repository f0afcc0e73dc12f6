//! Shared plumbing for HTTP-backed provider clients: a pooled `reqwest`
//! client factory and an SSE byte buffer resilient to UTF-8 split across
//! network chunks.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use llmgate_core::error::{Error, Result};

/// HTTP client tunables shared by every provider client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Duration,
    /// Max idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpConfig {
    /// Build a pooled `reqwest::Client` from this configuration.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
            .map_err(Error::Http)
    }
}

/// Accumulates raw SSE bytes and yields only complete, valid UTF-8 text,
/// holding back any trailing incomplete multi-byte sequence until the next
/// chunk arrives.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: BytesMut,
}

impl SseBuffer {
    /// Start an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return whatever complete UTF-8 text is now available.
    pub fn push_and_get_text(&mut self, bytes: &[u8]) -> String {
        self.buffer.put_slice(bytes);

        match std::str::from_utf8(&self.buffer) {
            Ok(s) => {
                let text = s.to_string();
                self.buffer.clear();
                text
            }
            Err(e) => {
                let valid_len = e.valid_up_to();
                let valid = self.buffer.split_to(valid_len);
                String::from_utf8_lossy(&valid).into_owned()
            }
        }
    }
}
