//! Circuit breaker contract and the sliding window implementation.
//!
//! State changes happen under a short lock over the outcome window; the
//! state itself is mirrored in an atomic so [`CircuitBreaker::is_open`] never
//! takes the lock.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use governance_policy::CircuitBreakPolicy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::window::{Outcome, SlidingWindow, WindowSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state transition of one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub uri: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

pub trait CircuitBreakerStateListener: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

/// Permission handed out by [`CircuitBreaker::acquire_permit`].
///
/// Remembers whether a half-open trial slot was taken, and in which
/// half-open round, so giving it back never frees a slot it does not own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerPermit {
    pub trial: bool,
    pub generation: u64,
}

/// Guards calls to one resource.
pub trait CircuitBreaker: Send + Sync {
    /// Ask for permission to call. Unconstrained by default.
    fn acquire(&self) -> bool {
        true
    }

    /// Give back a permission that was not used.
    fn release(&self) {}

    /// Like [`acquire`](Self::acquire), returning a permit that can be
    /// given back exactly.
    fn acquire_permit(&self) -> Option<BreakerPermit> {
        self.acquire().then(BreakerPermit::default)
    }

    fn release_permit(&self, permit: BreakerPermit) {
        if permit.trial {
            self.release();
        }
    }

    fn is_open(&self) -> bool;

    /// Whether a call could currently be admitted, including a trial call
    /// of an open breaker whose wait has elapsed.
    fn is_available(&self) -> bool {
        !self.is_open()
    }

    fn on_success(&self, duration: Duration);

    /// Record a failed call; `cause` is matched against the policy's record
    /// and ignore lists.
    fn on_error(&self, duration: Duration, cause: &str);

    fn add_listener(&self, listener: Arc<dyn CircuitBreakerStateListener>);

    fn policy(&self) -> &CircuitBreakPolicy;

    fn uri(&self) -> &str;

    /// Milliseconds since the epoch of the last successful acquire, 0 when
    /// never acquired.
    fn last_acquire_time(&self) -> i64;
}

struct Inner {
    window: SlidingWindow,
    half_open_successes: u32,
}

/// Breaker driven by failure and slow call rates over a sliding window.
pub struct SlidingWindowBreaker {
    uri: String,
    policy: CircuitBreakPolicy,
    state: AtomicU8,
    /// Milliseconds after `epoch` at which an open breaker admits trials.
    retry_at: AtomicI64,
    half_open_permits: AtomicU32,
    /// Bumped on every transition; trial permits of older rounds are void.
    generation: AtomicU64,
    last_acquire: AtomicI64,
    epoch: Instant,
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<Arc<dyn CircuitBreakerStateListener>>>,
}

impl std::fmt::Debug for SlidingWindowBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowBreaker")
            .field("uri", &self.uri)
            .field("state", &self.state())
            .finish()
    }
}

impl SlidingWindowBreaker {
    pub fn new(uri: impl Into<String>, policy: CircuitBreakPolicy) -> Self {
        Self {
            uri: uri.into(),
            inner: Mutex::new(Inner {
                window: SlidingWindow::new(&policy),
                half_open_successes: 0,
            }),
            policy,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            retry_at: AtomicI64::new(0),
            half_open_permits: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            last_acquire: AtomicI64::new(0),
            epoch: Instant::now(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current window counts.
    pub fn window(&self) -> WindowSnapshot {
        let now = self.now_secs();
        self.inner.lock().window.snapshot(now)
    }

    fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.policy.wait_duration_in_open_state_ms)
    }

    fn elapsed_millis(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    fn now_secs(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn classify(&self, duration: Duration, cause: Option<&str>) -> Option<Outcome> {
        let slow = duration >= Duration::from_millis(self.policy.slow_call_duration_threshold_ms);
        let failed = match cause {
            None => false,
            Some(cause) => {
                if self.policy.ignore_errors.iter().any(|e| cause.contains(e.as_str())) {
                    return None;
                }
                self.policy.record_errors.is_empty()
                    || self.policy.record_errors.iter().any(|e| cause.contains(e.as_str()))
            }
        };
        Some(Outcome { failed, slow })
    }

    fn record(&self, outcome: Outcome) {
        let change = {
            let mut inner = self.inner.lock();
            match self.state() {
                CircuitState::Closed => {
                    let snapshot = inner.window.record(outcome, self.now_secs());
                    if self.exceeds_thresholds(&snapshot) {
                        warn!(
                            uri = %self.uri,
                            calls = snapshot.calls,
                            failure_rate = snapshot.failure_rate(),
                            slow_call_rate = snapshot.slow_call_rate(),
                            "Circuit breaker opening"
                        );
                        Some(self.transition(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if outcome.failed || outcome.slow {
                        warn!(uri = %self.uri, "Circuit breaker re-opening after failed trial");
                        Some(self.transition(&mut inner, CircuitState::Open))
                    } else {
                        inner.half_open_successes += 1;
                        let required = self.policy.permitted_calls_in_half_open_state.max(1);
                        if inner.half_open_successes >= required {
                            info!(uri = %self.uri, "Circuit breaker closing after successful trials");
                            Some(self.transition(&mut inner, CircuitState::Closed))
                        } else {
                            None
                        }
                    }
                }
                CircuitState::Open => {
                    debug!(uri = %self.uri, "Outcome recorded while circuit open");
                    None
                }
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn exceeds_thresholds(&self, snapshot: &WindowSnapshot) -> bool {
        let minimum = self.policy.minimum_number_of_calls.max(1);
        if snapshot.calls < minimum {
            return false;
        }
        snapshot.failure_rate() >= self.policy.failure_rate_threshold
            || snapshot.slow_call_rate() >= self.policy.slow_call_rate_threshold
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) -> StateChange {
        let from = self.state();
        match to {
            CircuitState::Open => {
                let wait = i64::try_from(self.wait_duration().as_millis()).unwrap_or(i64::MAX);
                self.retry_at
                    .store(self.elapsed_millis().saturating_add(wait), Ordering::Release);
                self.half_open_permits.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                self.half_open_permits.store(0, Ordering::Release);
            }
            CircuitState::Closed => {
                inner.half_open_successes = 0;
                inner.window.reset();
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.state.store(to.as_u8(), Ordering::Release);
        StateChange {
            uri: self.uri.clone(),
            from,
            to,
        }
    }

    fn notify(&self, change: &StateChange) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_state_change(change);
        }
    }

    /// Take one of the bounded trial permits.
    fn try_trial(&self) -> bool {
        let limit = self.policy.permitted_calls_in_half_open_state.max(1);
        self.half_open_permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < limit).then_some(taken + 1)
            })
            .is_ok()
    }

    fn mark_acquired(&self) {
        self.last_acquire
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

impl SlidingWindowBreaker {
    fn trial_permit(&self) -> Option<BreakerPermit> {
        let generation = self.generation.load(Ordering::Acquire);
        if !self.try_trial() {
            return None;
        }
        self.mark_acquired();
        Some(BreakerPermit {
            trial: true,
            generation,
        })
    }

    fn give_back_trial(&self) {
        let _ = self
            .half_open_permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| taken.checked_sub(1));
    }
}

impl CircuitBreaker for SlidingWindowBreaker {
    fn acquire(&self) -> bool {
        self.acquire_permit().is_some()
    }

    /// Frees a trial slot if the breaker is half-open. Callers that may
    /// have been admitted while closed should use
    /// [`release_permit`](CircuitBreaker::release_permit) instead.
    fn release(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.give_back_trial();
        }
    }

    fn acquire_permit(&self) -> Option<BreakerPermit> {
        match self.state() {
            CircuitState::Closed => {
                self.mark_acquired();
                Some(BreakerPermit {
                    trial: false,
                    generation: self.generation.load(Ordering::Acquire),
                })
            }
            CircuitState::HalfOpen => self.trial_permit(),
            CircuitState::Open => {
                if self.elapsed_millis() < self.retry_at.load(Ordering::Acquire) {
                    return None;
                }
                let change = {
                    let mut inner = self.inner.lock();
                    if self.state() == CircuitState::Open {
                        info!(uri = %self.uri, "Circuit breaker half-open after wait");
                        Some(self.transition(&mut inner, CircuitState::HalfOpen))
                    } else {
                        None
                    }
                };
                if let Some(change) = change {
                    self.notify(&change);
                }
                self.trial_permit()
            }
        }
    }

    fn release_permit(&self, permit: BreakerPermit) {
        if permit.trial
            && self.state() == CircuitState::HalfOpen
            && permit.generation == self.generation.load(Ordering::Acquire)
        {
            self.give_back_trial();
        }
    }

    fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    fn is_available(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                self.half_open_permits.load(Ordering::Acquire)
                    < self.policy.permitted_calls_in_half_open_state.max(1)
            }
            CircuitState::Open => self.elapsed_millis() >= self.retry_at.load(Ordering::Acquire),
        }
    }

    fn on_success(&self, duration: Duration) {
        if let Some(outcome) = self.classify(duration, None) {
            self.record(outcome);
        }
    }

    fn on_error(&self, duration: Duration, cause: &str) {
        if let Some(outcome) = self.classify(duration, Some(cause)) {
            self.record(outcome);
        }
    }

    fn add_listener(&self, listener: Arc<dyn CircuitBreakerStateListener>) {
        self.listeners.write().push(listener);
    }

    fn policy(&self) -> &CircuitBreakPolicy {
        &self.policy
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn last_acquire_time(&self) -> i64 {
        self.last_acquire.load(Ordering::Relaxed)
    }
}
