use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit policy {0} has no sliding window")]
    NoWindow(String),

    #[error("rate limit policy {name} has an invalid window: {reason}")]
    InvalidWindow { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, RateLimitError>;
