//! Error types for the policy model.

use thiserror::Error;

/// Errors raised while building or parsing a policy snapshot.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("duplicate service name: {0}")]
    DuplicateService(String),

    #[error("duplicate live space id: {0}")]
    DuplicateLiveSpace(String),

    #[error("duplicate lane space id: {0}")]
    DuplicateLaneSpace(String),

    #[error("duplicate database cluster name: {0}")]
    DuplicateDbCluster(String),

    #[error("invalid policy: {0}")]
    Invalid(String),

    #[error("policy document could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
