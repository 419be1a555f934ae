//! # Ingest Gateway
//!
//! Webhook boundary of the funnel pipeline. Validates single and bulk event
//! submissions, splits bulk arrays into sub-batches and publishes them to the
//! durable log under `events.<source>.<funnelStage>`.
//!
//! ```text
//! POST /webhook/events       ─► IngressBatcher::ingest_single ─► DurablePublisher::publish
//! POST /webhook/events/bulk  ─► IngressBatcher::ingest_bulk   ─► DurablePublisher::publish_many
//! ```

pub mod batcher;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod publisher;

use actix_web::web;
use batcher::IngressBatcher;
use event_log::DurableLog;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;

pub use config::GatewayConfig;
pub use error::{json_error_handler, PublishError};

/// Shared handler state
pub struct AppState {
    pub batcher: IngressBatcher,
    pub log: Arc<dyn DurableLog>,
    pub registry: Registry,
    pub started_at: Instant,
}

/// Body limit and 400 handler for webhook JSON
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(json_error_handler)
}

/// Register every gateway route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/webhook")
            .route("/events", web::post().to(handlers::receive_event))
            .route("/events/bulk", web::post().to(handlers::receive_bulk)),
    )
    .service(
        web::scope("/health")
            .route("", web::get().to(health::health_check))
            .route("/liveness", web::get().to(health::liveness_check))
            .route("/readiness", web::get().to(health::readiness_check)),
    )
    .route("/metrics", web::get().to(health::metrics));
}
