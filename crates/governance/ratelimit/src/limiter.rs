//! Smooth bursty token bucket.
//!
//! Permits are laid out on one virtual timeline in microseconds.
//! `next_free_micros` is the instant the timeline is paid up to; idle time
//! before it is banked as stored permits up to `max_permits`. A reservation
//! spends stored credit first and pays for the rest by pushing
//! `next_free_micros` forward one interval per permit. The caller waits until
//! its own permits are paid for, so a caller arriving after a burst is paced
//! by the steady rate.
//!
//! Accounting happens under a short lock; waiting happens after it is
//! released.

use std::sync::Arc;
use std::time::Duration;

use governance_policy::RateLimitPolicy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{RateLimitError, Result};
use crate::stopwatch::{SleepingStopwatch, Stopwatch};

/// `a + b`, clamped to the `i64` range instead of wrapping.
pub fn saturated_add(a: i64, b: i64) -> i64 {
    a.saturating_add(b)
}

/// Admission gate for one rate limited resource.
pub trait RateLimiter: Send + Sync {
    /// Take `permits`, waiting at most `timeout`. Returns false without
    /// waiting when the permits cannot be granted in time.
    fn acquire(&self, permits: u32, timeout: Duration) -> bool;

    fn try_acquire(&self) -> bool {
        self.acquire(1, Duration::ZERO)
    }

    fn policy(&self) -> &RateLimitPolicy;
}

#[derive(Debug)]
struct Bucket {
    stored_permits: f64,
    max_permits: f64,
    interval_micros: f64,
    next_free_micros: i64,
}

impl Bucket {
    /// Bank the credit earned since `next_free_micros`.
    fn resync(&mut self, now_micros: i64) {
        if now_micros > self.next_free_micros {
            let earned = (now_micros - self.next_free_micros) as f64 / self.interval_micros;
            self.stored_permits = self.max_permits.min(self.stored_permits + earned);
            self.next_free_micros = now_micros;
        }
    }

    /// Reserve `permits` and return the instant they are paid for, or
    /// `None` without touching the bucket when that instant is more than
    /// `timeout_micros` away.
    fn reserve(&mut self, permits: f64, now_micros: i64, timeout_micros: i64) -> Option<i64> {
        self.resync(now_micros);
        let stored = permits.min(self.stored_permits);
        let cost = ((permits - stored) * self.interval_micros) as i64;
        let ready_at = saturated_add(self.next_free_micros, cost);
        if saturated_add(ready_at, -now_micros) > timeout_micros {
            return None;
        }
        self.next_free_micros = ready_at;
        self.stored_permits -= stored;
        Some(ready_at)
    }
}

pub struct TokenBucketLimiter {
    policy: RateLimitPolicy,
    stopwatch: Arc<dyn Stopwatch>,
    bucket: Mutex<Bucket>,
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("policy", &self.policy.name)
            .field("bucket", &*self.bucket.lock())
            .finish()
    }
}

impl TokenBucketLimiter {
    /// Limiter paced by the policy's tightest window, with the policy's
    /// burst allowance.
    pub fn from_policy(policy: RateLimitPolicy) -> Result<Self> {
        Self::with_stopwatch(policy, Arc::new(SleepingStopwatch::new()))
    }

    pub fn with_stopwatch(policy: RateLimitPolicy, stopwatch: Arc<dyn Stopwatch>) -> Result<Self> {
        let window = policy
            .primary_window()
            .ok_or_else(|| RateLimitError::NoWindow(policy.name.clone()))?;
        if window.threshold == 0 || window.time_window_in_ms == 0 {
            return Err(RateLimitError::InvalidWindow {
                name: policy.name.clone(),
                reason: "threshold and time window must be positive".to_string(),
            });
        }
        let interval_micros = window.permit_interval_micros();
        let permits_per_second = 1_000_000.0 / interval_micros;
        // A bucket holds at least one permit, otherwise nothing is ever granted
        // without waiting.
        let max_permits = (policy.max_burst_seconds.max(0.0) * permits_per_second).max(1.0);
        let bucket = Bucket {
            stored_permits: max_permits,
            max_permits,
            interval_micros,
            next_free_micros: stopwatch.read_micros(),
        };
        Ok(Self {
            policy,
            stopwatch,
            bucket: Mutex::new(bucket),
        })
    }

    /// Reserve `permits` if they can be granted within `timeout` and return
    /// how long the caller must wait first.
    fn reserve(&self, permits: u32, timeout: Duration) -> Option<i64> {
        let timeout_micros = i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX);
        let mut bucket = self.bucket.lock();
        let now = self.stopwatch.read_micros();
        match bucket.reserve(f64::from(permits), now, timeout_micros) {
            Some(ready_at) => Some((ready_at - now).max(0)),
            None => {
                debug!(
                    policy = %self.policy.name,
                    permits,
                    stored = bucket.stored_permits,
                    timeout_micros,
                    "Rate limit permits not available in time"
                );
                None
            }
        }
    }

    /// Async variant of [`RateLimiter::acquire`] that suspends instead of
    /// blocking the thread.
    pub async fn acquire_async(&self, permits: u32, timeout: Duration) -> bool {
        match self.reserve(permits, timeout) {
            Some(wait) => {
                if wait > 0 {
                    tokio::time::sleep(Duration::from_micros(wait.unsigned_abs())).await;
                }
                true
            }
            None => false,
        }
    }

    pub fn limit_policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn policy_version(&self) -> u64 {
        self.policy.version
    }

    pub fn stored_permits(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.resync(self.stopwatch.read_micros());
        bucket.stored_permits
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn acquire(&self, permits: u32, timeout: Duration) -> bool {
        match self.reserve(permits, timeout) {
            Some(wait) => {
                self.stopwatch.sleep_micros(wait);
                true
            }
            None => false,
        }
    }

    fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}
