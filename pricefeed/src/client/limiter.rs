//! Token bucket sized to the remote API's published request budget.

use crate::scope::Scope;
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Local request limiter.
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide
/// instance. [`RateLimiter::close`] stops accepting waits and releases the
/// ones in progress.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    tokens_per_sec: f64,
    capacity: f64,
    closed: CancellationToken,
}

impl RateLimiter {
    /// `requests` per minute with a burst of one.
    pub fn per_minute(requests: u32) -> Self {
        let requests = requests.max(1);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
            tokens_per_sec: f64::from(requests) / 60.0,
            capacity: 1.0,
            closed: CancellationToken::new(),
        }
    }

    /// Allow up to `burst` back-to-back requests. The bucket starts full.
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.capacity = f64::from(burst.max(1));
        self.bucket.get_mut().tokens = self.capacity;
        self
    }

    pub fn requests_per_minute(&self) -> f64 {
        self.tokens_per_sec * 60.0
    }

    /// Wait until a request may be issued.
    ///
    /// Suspends until a token is available, the scope is cancelled or
    /// expires, or the limiter is closed.
    pub async fn acquire(&self, scope: &Scope) -> Result<()> {
        scope.check()?;
        loop {
            if self.closed.is_cancelled() {
                return Err(Error::LimiterClosed);
            }

            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.tokens_per_sec)
            };

            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting");
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Error::LimiterClosed),
                slept = scope.sleep(wait) => slept?,
            }
        }
    }

    /// Stop accepting waits; current waiters fail with [`Error::LimiterClosed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
