use crate::AppState;
use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Dependencies {
    pub broker: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Seconds since the process started serving
    pub uptime: f64,
    pub version: String,
    pub dependencies: Dependencies,
}

fn broker_status(connected: bool) -> String {
    if connected { "connected" } else { "disconnected" }.to_string()
}

/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let connected = state.log.health_check().await;

    HttpResponse::Ok().json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: Dependencies {
            broker: broker_status(connected),
        },
    })
}

/// GET /health/readiness (503 while the broker is unreachable)
pub async fn readiness_check(state: web::Data<AppState>) -> impl Responder {
    let connected = state.log.health_check().await;
    let body = serde_json::json!({
        "ready": connected,
        "checks": { "broker": broker_status(connected) },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if connected {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}

/// GET /metrics
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    match pipeline_metrics::encode_registry(&state.registry) {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}
