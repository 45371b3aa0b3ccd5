//! Error types for the generation client.

use thiserror::Error;

/// Result type for generation client operations.
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Generation client errors.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Missing or empty credential. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure, timeout, or non-2xx response from the backend
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An attached image could not be decoded or re-encoded
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl GenerationError {
    /// Whether a later, user-triggered re-invocation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::UpstreamUnavailable(_))
    }
}
