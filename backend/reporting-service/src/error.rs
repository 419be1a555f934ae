use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid report filter: {0}")]
    InvalidFilter(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Report query timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    timestamp: String,
}

impl ResponseError for ReportError {
    fn status_code(&self) -> StatusCode {
        match self {
            ReportError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            ReportError::Database(e) if db_pool::is_transient(e) => StatusCode::SERVICE_UNAVAILABLE,
            ReportError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ReportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal details stay in the logs
        let error = match self {
            ReportError::InvalidFilter(_) => self.to_string(),
            ReportError::Database(_) => "Failed to generate report".to_string(),
            ReportError::Timeout(_) => "Report generation timed out".to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            success: false,
            error,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}
