//! # Reporting Service
//!
//! Read-only aggregate reports over the tables written by `event-collector`:
//! event counts, revenue and user demographics.

pub mod buckets;
pub mod config;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod health;
pub mod reports;

use actix_web::{web, HttpResponse};
use prometheus::Registry;
use std::time::{Duration, Instant};

pub use config::ReporterConfig;
pub use error::ReportError;
pub use filters::{ReportFilters, ReportQuery, TimeRange};
pub use reports::ReportRepository;

pub struct AppState {
    pub reports: ReportRepository,
    pub query_timeout: Duration,
    pub registry: Registry,
    pub started_at: Instant,
}

/// Unparseable query strings get the same 400 body as invalid filter values
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(serde_json::json!({
                "success": false,
                "error": format!("Invalid report filter: {}", message),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
        .into()
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reports")
            .app_data(query_config())
            .route("/events", web::get().to(handlers::event_stats))
            .route("/revenue", web::get().to(handlers::revenue))
            .route("/demographics", web::get().to(handlers::demographics)),
    )
    .service(
        web::scope("/health")
            .route("", web::get().to(health::health_check))
            .route("/liveness", web::get().to(health::liveness_check))
            .route("/readiness", web::get().to(health::readiness_check)),
    )
    .route("/metrics", web::get().to(health::metrics));
}
