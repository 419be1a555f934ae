//! Error types for the durable log adapters

use rdkafka::error::KafkaError;
use thiserror::Error;

pub type LogResult<T> = Result<T, LogError>;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// No configured stream captures the subject
    #[error("No stream captures subject {0}")]
    NoStreamForSubject(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Broker unreachable or refusing writes
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Admin operation failed for {resource}: {reason}")]
    Admin { resource: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LogError {
    /// Check if error is transient (worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            LogError::Unavailable(_) => true,
            LogError::Kafka(err) => !matches!(
                err,
                KafkaError::ClientCreation(_) | KafkaError::Subscription(_)
            ),
            _ => false,
        }
    }
}
