//! Webhook handlers
//!
//! Pipeline failures never change the status code: every response is 200
//! with a `success` flag. Malformed top-level JSON is rejected by the
//! `JsonConfig` error handler before these run.

use crate::batcher::{BulkOutcome, SingleOutcome};
use crate::AppState;
use actix_middleware::CorrelationId;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub events: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkResponse {
    pub success: bool,
    pub message: String,
    pub processed: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// POST /webhook/events
pub async fn receive_event(
    state: web::Data<AppState>,
    correlation_id: CorrelationId,
    body: web::Json<Value>,
) -> HttpResponse {
    let outcome = state
        .batcher
        .ingest_single(body.into_inner(), correlation_id.as_str())
        .await;

    let response = match outcome {
        SingleOutcome::Published => WebhookResponse {
            success: true,
            message: "Event processed successfully".to_string(),
        },
        SingleOutcome::Invalid(reason) => WebhookResponse {
            success: false,
            message: format!("Invalid event format: {}", reason),
        },
        SingleOutcome::PublishFailed => WebhookResponse {
            success: false,
            message: "Failed to publish event".to_string(),
        },
    };

    HttpResponse::Ok().json(response)
}

/// POST /webhook/events/bulk
pub async fn receive_bulk(
    state: web::Data<AppState>,
    correlation_id: CorrelationId,
    body: web::Json<BulkRequest>,
) -> HttpResponse {
    let BulkRequest { events } = body.into_inner();

    let response = match state
        .batcher
        .ingest_bulk(events, correlation_id.as_str())
        .await
    {
        BulkOutcome::Completed(result) => BulkResponse {
            success: result.failed == 0,
            message: format!(
                "Bulk processing completed: {} processed, {} failed",
                result.processed, result.failed
            ),
            processed: result.processed,
            failed: result.failed,
            errors: result.errors,
        },
        BulkOutcome::TooLarge { received, limit } => BulkResponse {
            success: false,
            message: format!(
                "Bulk submission of {} events exceeds the limit of {}",
                received, limit
            ),
            processed: 0,
            failed: received,
            errors: Vec::new(),
        },
    };

    HttpResponse::Ok().json(response)
}
