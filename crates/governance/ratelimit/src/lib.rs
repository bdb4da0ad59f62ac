//! Token bucket rate limiting for governed services.
//!
//! Limiters pace callers against the tightest configured window and allow a
//! bounded burst of banked idle credit. Callers either wait up to a timeout
//! or are refused immediately.

mod error;
mod limiter;
mod registry;
mod stopwatch;

pub use error::{RateLimitError, Result};
pub use limiter::{saturated_add, RateLimiter, TokenBucketLimiter};
pub use registry::{limiter_key, RateLimiterRegistry};
pub use stopwatch::{SleepingStopwatch, Stopwatch};
