use idempotent_consumer::ProcessingError;
use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode raw payload of {event_id}: {source}")]
    Encode {
        event_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Infrastructure failures that may succeed on redelivery
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Database(e) => db_pool::is_transient(e),
            SinkError::Unavailable(_) => true,
            SinkError::Encode { .. } => false,
        }
    }
}

impl From<SinkError> for ProcessingError {
    fn from(err: SinkError) -> Self {
        if err.is_transient() {
            ProcessingError::transient(err.to_string())
        } else {
            ProcessingError::permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_is_redelivered() {
        let err: ProcessingError = SinkError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());

        let err: ProcessingError = SinkError::Unavailable("offline".into()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_data_errors_terminate() {
        let err: ProcessingError = SinkError::Database(sqlx::Error::RowNotFound).into();
        assert!(!err.is_retryable());
        assert!(matches!(err, ProcessingError::Permanent(_)));
    }
}
