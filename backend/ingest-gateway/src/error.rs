use actix_web::{error::JsonPayloadError, HttpRequest, HttpResponse};
use event_log::LogError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure of one publish attempt
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Broker(#[from] LogError),
}

/// Event could not be written to the durable log
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to publish {event_id} to {subject} after {attempts} attempts: {last_error}")]
    Exhausted {
        event_id: String,
        subject: String,
        attempts: u32,
        last_error: AttemptError,
    },

    #[error("Failed to encode envelope for {event_id}: {source}")]
    Encode {
        event_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PublishError {
    pub fn attempts(&self) -> u32 {
        match self {
            PublishError::Exhausted { attempts, .. } => *attempts,
            PublishError::Encode { .. } => 0,
        }
    }
}

#[derive(Serialize)]
struct JsonErrorBody {
    success: bool,
    message: String,
}

/// Malformed top-level JSON is the only non-200 webhook response
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            "Payload too large".to_string()
        }
        JsonPayloadError::ContentType => "Content type must be application/json".to_string(),
        other => format!("Invalid JSON payload: {}", other),
    };

    let response = HttpResponse::BadRequest().json(JsonErrorBody {
        success: false,
        message,
    });
    actix_web::error::InternalError::from_response(err, response).into()
}
