//! # Actix Middleware Library
//!
//! Shared middleware for the pipeline's HTTP services
//!
//! ## Modules
//! - `correlation_id`: extract or generate `x-correlation-id`, echo it back
//! - `logging`: structured per-request logging
//! - `metrics`: Prometheus request counters and latency histograms

pub mod correlation_id;
pub mod logging;
pub mod metrics;

pub use correlation_id::{
    get_correlation_id, CorrelationId, CorrelationIdMiddleware, CORRELATION_ID_HEADER,
};
pub use logging::RequestLogging;
pub use metrics::HttpMetrics;
