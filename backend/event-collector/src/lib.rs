//! # Event Collector
//!
//! Consumes the per-source streams and materializes every event into the
//! idempotent sink.
//!
//! ```text
//! FACEBOOK_EVENTS ─► StreamConsumer ─┐
//!                                    ├─► MaterializingHandler ─► EventMaterializer ─► EventSink
//! TIKTOK_EVENTS   ─► StreamConsumer ─┘
//! ```
//!
//! Delivery is at-least-once. Redelivered messages are absorbed by the sink:
//! one `processed_events` row and at most one `revenue_transactions` row per
//! `event_id`, however often a message arrives.

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod materializer;
pub mod records;
pub mod runtime;
pub mod sink;

use actix_web::web;
use event_log::DurableLog;
use prometheus::Registry;
use runtime::ConsumerLiveness;
use sink::EventSink;
use std::sync::Arc;
use std::time::Instant;

pub use config::CollectorConfig;
pub use error::{SinkError, SinkResult};
pub use handler::MaterializingHandler;
pub use materializer::{BatchWriteReport, EventMaterializer, MaterializeOutcome};

/// Shared state of the health and metrics endpoints
pub struct AppState {
    pub log: Arc<dyn DurableLog>,
    pub sink: Arc<dyn EventSink>,
    pub consumers: Arc<ConsumerLiveness>,
    pub registry: Registry,
    pub started_at: Instant,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/health")
            .route("", web::get().to(health::health_check))
            .route("/liveness", web::get().to(health::liveness_check))
            .route("/readiness", web::get().to(health::readiness_check)),
    )
    .route("/metrics", web::get().to(health::metrics));
}
