use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Token bucket shared by the per-IP and per-connection limiters.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(max_tokens: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: now,
        }
    }

    fn take(&mut self, now: Instant, max_tokens: f64, refill_rate: f64) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// IP-based rate limiter for the REST surface.
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl IpRateLimiter {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns `true` if the request is allowed, `false` if rate-limited.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(self.max_tokens, now))
            .take(now, self.max_tokens, self.refill_rate)
    }

    /// Remove stale entries that haven't been accessed in the given duration.
    pub async fn cleanup(&self, max_age: Duration) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
    }
}

/// Per-connection limiter for inbound WebSocket frames. Owned by the read
/// loop, so no locking.
#[derive(Debug)]
pub struct FrameRateLimiter {
    bucket: TokenBucket,
    max_tokens: f64,
    refill_rate: f64,
}

impl FrameRateLimiter {
    /// Burst equals one second's worth of frames.
    pub fn new(per_sec: f64) -> Self {
        Self {
            bucket: TokenBucket::full(per_sec, Instant::now()),
            max_tokens: per_sec,
            refill_rate: per_sec,
        }
    }

    /// Returns true if the frame is allowed; false if rate-limited.
    pub fn allow(&mut self) -> bool {
        self.bucket
            .take(Instant::now(), self.max_tokens, self.refill_rate)
    }
}
