use governance_circuitbreak::CircuitBreakError;
use governance_invoke::InvokeError;
use governance_policy::PolicyError;
use governance_ratelimit::RateLimitError;
use thiserror::Error;

/// Errors raised while setting up or feeding the engine.
///
/// Routing and admission decisions are not errors; they surface as
/// [`governance_invoke::Fault`] values.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("invocation error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("circuit breaker error: {0}")]
    CircuitBreak(#[from] CircuitBreakError),

    #[error("rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
