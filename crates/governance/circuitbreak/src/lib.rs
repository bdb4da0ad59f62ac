//! Circuit breakers guarding calls to unhealthy downstreams.
//!
//! A [`SlidingWindowBreaker`] tracks failure and slow call rates over the
//! configured window, opens when a threshold is breached, and after the wait
//! duration admits a bounded number of trial calls.

pub mod breaker;
pub mod error;
pub mod registry;
mod window;

pub use breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerStateListener, CircuitState, SlidingWindowBreaker,
    StateChange,
};
pub use error::{CircuitBreakError, Result};
pub use registry::{instance_uri, service_uri, CircuitBreakerRegistry};
pub use window::WindowSnapshot;
