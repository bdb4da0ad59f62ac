use thiserror::Error;

#[derive(Debug, Error)]
pub enum CircuitBreakError {
    #[error("circuit breaker policy has no name")]
    UnnamedPolicy,

    #[error("invalid circuit breaker policy {name}: {reason}")]
    InvalidPolicy { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CircuitBreakError>;
