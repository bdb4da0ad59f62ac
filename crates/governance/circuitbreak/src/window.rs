//! Rolling outcome counters.

use std::collections::VecDeque;

use governance_policy::{CircuitBreakPolicy, SlidingWindowType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub failed: bool,
    pub slow: bool,
}

/// Aggregated view of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub calls: u32,
    pub failures: u32,
    pub slow_calls: u32,
}

impl WindowSnapshot {
    pub fn failure_rate(&self) -> f32 {
        rate(self.failures, self.calls)
    }

    pub fn slow_call_rate(&self) -> f32 {
        rate(self.slow_calls, self.calls)
    }
}

fn rate(part: u32, calls: u32) -> f32 {
    if calls == 0 {
        0.0
    } else {
        part as f32 * 100.0 / calls as f32
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Bucket {
    second: u64,
    calls: u32,
    failures: u32,
    slow_calls: u32,
}

#[derive(Debug)]
pub(crate) enum SlidingWindow {
    /// Last `size` outcomes.
    Count {
        size: usize,
        outcomes: VecDeque<Outcome>,
    },
    /// Outcomes of the last `size` seconds, one bucket per second.
    Time { size: u64, buckets: VecDeque<Bucket> },
}

impl SlidingWindow {
    pub fn new(policy: &CircuitBreakPolicy) -> Self {
        let size = policy.sliding_window_size.max(1);
        match policy.sliding_window_type {
            SlidingWindowType::Count => SlidingWindow::Count {
                size: size as usize,
                outcomes: VecDeque::with_capacity(size as usize),
            },
            SlidingWindowType::Time => SlidingWindow::Time {
                size: u64::from(size),
                buckets: VecDeque::new(),
            },
        }
    }

    /// Record one outcome; `now_secs` is only used by time windows.
    pub fn record(&mut self, outcome: Outcome, now_secs: u64) -> WindowSnapshot {
        match self {
            SlidingWindow::Count { size, outcomes } => {
                if outcomes.len() == *size {
                    outcomes.pop_front();
                }
                outcomes.push_back(outcome);
            }
            SlidingWindow::Time { buckets, .. } => {
                match buckets.back_mut() {
                    Some(bucket) if bucket.second == now_secs => add(bucket, outcome),
                    _ => {
                        let mut bucket = Bucket {
                            second: now_secs,
                            ..Bucket::default()
                        };
                        add(&mut bucket, outcome);
                        buckets.push_back(bucket);
                    }
                }
            }
        }
        self.snapshot(now_secs)
    }

    pub fn snapshot(&mut self, now_secs: u64) -> WindowSnapshot {
        match self {
            SlidingWindow::Count { outcomes, .. } => {
                outcomes
                    .iter()
                    .fold(WindowSnapshot::default(), |mut s, outcome| {
                        s.calls += 1;
                        s.failures += u32::from(outcome.failed);
                        s.slow_calls += u32::from(outcome.slow);
                        s
                    })
            }
            SlidingWindow::Time { size, buckets } => {
                let oldest = now_secs.saturating_sub(*size - 1);
                while buckets.front().is_some_and(|b| b.second < oldest) {
                    buckets.pop_front();
                }
                buckets.iter().fold(WindowSnapshot::default(), |mut s, b| {
                    s.calls += b.calls;
                    s.failures += b.failures;
                    s.slow_calls += b.slow_calls;
                    s
                })
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            SlidingWindow::Count { outcomes, .. } => outcomes.clear(),
            SlidingWindow::Time { buckets, .. } => buckets.clear(),
        }
    }
}

fn add(bucket: &mut Bucket, outcome: Outcome) {
    bucket.calls += 1;
    bucket.failures += u32::from(outcome.failed);
    bucket.slow_calls += u32::from(outcome.slow);
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAIL: Outcome = Outcome {
        failed: true,
        slow: false,
    };
    const OK: Outcome = Outcome {
        failed: false,
        slow: false,
    };

    #[test]
    fn count_window_evicts_oldest() {
        let policy = CircuitBreakPolicy {
            sliding_window_size: 3,
            ..CircuitBreakPolicy::default()
        };
        let mut window = SlidingWindow::new(&policy);
        window.record(FAIL, 0);
        window.record(OK, 0);
        window.record(OK, 0);
        let snapshot = window.record(OK, 0);
        assert_eq!(snapshot.calls, 3);
        assert_eq!(snapshot.failures, 0);
    }

    #[test]
    fn time_window_drops_expired_buckets() {
        let policy = CircuitBreakPolicy {
            sliding_window_type: SlidingWindowType::Time,
            sliding_window_size: 2,
            ..CircuitBreakPolicy::default()
        };
        let mut window = SlidingWindow::new(&policy);
        window.record(FAIL, 10);
        window.record(FAIL, 11);
        assert_eq!(window.snapshot(11).failures, 2);
        assert_eq!(window.snapshot(12).failures, 1);
        assert_eq!(window.snapshot(20).calls, 0);
    }

    #[test]
    fn rates_are_percentages() {
        let snapshot = WindowSnapshot {
            calls: 4,
            failures: 1,
            slow_calls: 2,
        };
        assert_eq!(snapshot.failure_rate(), 25.0);
        assert_eq!(snapshot.slow_call_rate(), 50.0);
    }
}
