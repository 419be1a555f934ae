//! Error types for the stream consumer

use event_log::LogError;
use std::time::Duration;
use thiserror::Error;

pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Failure of the consumer loop itself (not of a single message)
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Durable log error: {0}")]
    Log(#[from] LogError),
}

/// Outcome of handling one message, as classified by the handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Processing did not finish within the per-message budget
    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),

    /// Infrastructure failure (pool exhausted, connection dropped)
    #[error("Transient processing failure: {0}")]
    Transient(String),

    /// Data can never be processed (malformed payload, constraint violation)
    #[error("Permanent processing failure: {0}")]
    Permanent(String),
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProcessingError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProcessingError::Permanent(message.into())
    }

    /// Check if the message should be redelivered
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::Timeout(_) | ProcessingError::Transient(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProcessingError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ProcessingError::transient("pool timed out").is_retryable());
        assert!(!ProcessingError::permanent("check constraint").is_retryable());
    }
}
