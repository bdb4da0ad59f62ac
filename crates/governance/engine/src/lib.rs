//! Traffic governance engine.
//!
//! Ties the policy store, the route and inbound filter chains, circuit
//! breakers and rate limiters into one facade a host call path consults on
//! every intercepted request.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::{
    ApplicationConfig, GovernanceConfig, LoadBalanceConfig, LocationConfig, LoggingConfig,
    RateLimitConfig, ToggleConfig,
};
pub use engine::{Admission, GovernanceEngine};
pub use error::{EngineError, Result};
pub use logging::init_tracing;
