use std::time::{Duration, Instant};

/// Monotonic microsecond clock the limiter accounts against.
pub trait Stopwatch: Send + Sync {
    fn read_micros(&self) -> i64;

    fn sleep_micros(&self, micros: i64);
}

/// Wall clock stopwatch that blocks the calling thread to wait.
#[derive(Debug, Clone, Copy)]
pub struct SleepingStopwatch {
    start: Instant,
}

impl SleepingStopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SleepingStopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch for SleepingStopwatch {
    fn read_micros(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn sleep_micros(&self, micros: i64) {
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros.unsigned_abs()));
        }
    }
}
