//! Pipeline counters behind an injected collaborator
//!
//! Services receive an `Arc<dyn PipelineMetrics>` at construction time instead
//! of touching process-wide statics. Two implementations are provided:
//!
//! - [`PrometheusPipelineMetrics`]: registers on a caller-owned [`Registry`],
//!   exposed by the service's `/metrics` endpoint
//! - [`AtomicPipelineMetrics`]: plain atomic counters for tests and embedded use
//!
//! Every counter is labelled by `source` and `funnel_stage`. Increments are
//! monotonic and carry no cross-event ordering guarantee.

use event_schema::{FunnelStage, Source};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

pub trait PipelineMetrics: Send + Sync {
    /// Event entered the publish path
    fn record_accepted(&self, source: Source, stage: FunnelStage);
    /// Event published (gateway) or acknowledged after materialization (collector)
    fn record_processed(&self, source: Source, stage: FunnelStage);
    /// Validation failure, publish failure, termination or exhausted redelivery
    fn record_failed(&self, source: Source, stage: FunnelStage);
    fn record_redelivered(&self, source: Source, stage: FunnelStage);
    fn record_dead_lettered(&self, source: Source, stage: FunnelStage);
    fn observe_processing_time(&self, source: Source, stage: FunnelStage, elapsed: Duration);
}

const LABELS: &[&str] = &["source", "funnel_stage"];

#[derive(Clone)]
pub struct PrometheusPipelineMetrics {
    accepted: IntCounterVec,
    processed: IntCounterVec,
    failed: IntCounterVec,
    redelivered: IntCounterVec,
    dead_lettered: IntCounterVec,
    processing_seconds: HistogramVec,
}

impl PrometheusPipelineMetrics {
    /// Create the pipeline metric families and register them on `registry`
    ///
    /// `service` is attached as a constant label. Registration conflicts are
    /// logged and do not fail construction.
    pub fn new(registry: &Registry, service: &str) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| {
            IntCounterVec::new(
                Opts::new(name, help).const_label("service", service.to_string()),
                LABELS,
            )
        };

        let accepted = counter("pipeline_events_accepted_total", "Events accepted for publishing")?;
        let processed = counter(
            "pipeline_events_processed_total",
            "Events published or acknowledged after processing",
        )?;
        let failed = counter(
            "pipeline_events_failed_total",
            "Events rejected, terminated or exhausted",
        )?;
        let redelivered = counter(
            "pipeline_events_redelivered_total",
            "Messages negatively acknowledged for redelivery",
        )?;
        let dead_lettered = counter(
            "pipeline_events_dead_lettered_total",
            "Messages captured by the dead-letter sink",
        )?;
        let processing_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pipeline_event_processing_seconds",
                "Time spent processing one event",
            )
            .const_label("service", service.to_string())
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            LABELS,
        )?;

        for metric in [
            Box::new(accepted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(processed.clone()),
            Box::new(failed.clone()),
            Box::new(redelivered.clone()),
            Box::new(dead_lettered.clone()),
            Box::new(processing_seconds.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register pipeline metric: {}", e);
            }
        }

        Ok(Self {
            accepted,
            processed,
            failed,
            redelivered,
            dead_lettered,
            processing_seconds,
        })
    }
}

impl PipelineMetrics for PrometheusPipelineMetrics {
    fn record_accepted(&self, source: Source, stage: FunnelStage) {
        self.accepted
            .with_label_values(&[source.as_str(), stage.as_str()])
            .inc();
    }

    fn record_processed(&self, source: Source, stage: FunnelStage) {
        self.processed
            .with_label_values(&[source.as_str(), stage.as_str()])
            .inc();
    }

    fn record_failed(&self, source: Source, stage: FunnelStage) {
        self.failed
            .with_label_values(&[source.as_str(), stage.as_str()])
            .inc();
    }

    fn record_redelivered(&self, source: Source, stage: FunnelStage) {
        self.redelivered
            .with_label_values(&[source.as_str(), stage.as_str()])
            .inc();
    }

    fn record_dead_lettered(&self, source: Source, stage: FunnelStage) {
        self.dead_lettered
            .with_label_values(&[source.as_str(), stage.as_str()])
            .inc();
    }

    fn observe_processing_time(&self, source: Source, stage: FunnelStage, elapsed: Duration) {
        self.processing_seconds
            .with_label_values(&[source.as_str(), stage.as_str()])
            .observe(elapsed.as_secs_f64());
    }
}

/// Encode every family in `registry` in the Prometheus text format
///
/// Returns the content type alongside the encoded body.
pub fn encode_registry(registry: &Registry) -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

/// Point-in-time view of one `(source, funnel_stage)` cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub accepted: u64,
    pub processed: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct CounterCell {
    accepted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Atomic counters indexed by `(source, funnel_stage)`
#[derive(Default)]
pub struct AtomicPipelineMetrics {
    cells: [CounterCell; 4],
}

impl AtomicPipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, source: Source, stage: FunnelStage) -> &CounterCell {
        let source_idx = match source {
            Source::Facebook => 0,
            Source::Tiktok => 2,
        };
        let stage_idx = match stage {
            FunnelStage::Top => 0,
            FunnelStage::Bottom => 1,
        };
        &self.cells[source_idx + stage_idx]
    }

    pub fn snapshot(&self, source: Source, stage: FunnelStage) -> CounterSnapshot {
        let cell = self.cell(source, stage);
        CounterSnapshot {
            accepted: cell.accepted.load(Ordering::Relaxed),
            processed: cell.processed.load(Ordering::Relaxed),
            failed: cell.failed.load(Ordering::Relaxed),
            redelivered: cell.redelivered.load(Ordering::Relaxed),
            dead_lettered: cell.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Sum over every label pair
    pub fn totals(&self) -> CounterSnapshot {
        let mut total = CounterSnapshot::default();
        for source in Source::ALL {
            for stage in [FunnelStage::Top, FunnelStage::Bottom] {
                let s = self.snapshot(source, stage);
                total.accepted += s.accepted;
                total.processed += s.processed;
                total.failed += s.failed;
                total.redelivered += s.redelivered;
                total.dead_lettered += s.dead_lettered;
            }
        }
        total
    }
}

impl PipelineMetrics for AtomicPipelineMetrics {
    fn record_accepted(&self, source: Source, stage: FunnelStage) {
        self.cell(source, stage).accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processed(&self, source: Source, stage: FunnelStage) {
        self.cell(source, stage).processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self, source: Source, stage: FunnelStage) {
        self.cell(source, stage).failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_redelivered(&self, source: Source, stage: FunnelStage) {
        self.cell(source, stage)
            .redelivered
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_dead_lettered(&self, source: Source, stage: FunnelStage) {
        self.cell(source, stage)
            .dead_lettered
            .fetch_add(1, Ordering::Relaxed);
    }

    fn observe_processing_time(&self, _source: Source, _stage: FunnelStage, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counters_are_labelled() {
        let metrics = AtomicPipelineMetrics::new();
        metrics.record_processed(Source::Facebook, FunnelStage::Top);
        metrics.record_processed(Source::Facebook, FunnelStage::Top);
        metrics.record_failed(Source::Tiktok, FunnelStage::Bottom);

        assert_eq!(metrics.snapshot(Source::Facebook, FunnelStage::Top).processed, 2);
        assert_eq!(metrics.snapshot(Source::Facebook, FunnelStage::Bottom).processed, 0);
        assert_eq!(metrics.snapshot(Source::Tiktok, FunnelStage::Bottom).failed, 1);

        let totals = metrics.totals();
        assert_eq!(totals.processed, 2);
        assert_eq!(totals.failed, 1);
    }

    #[test]
    fn test_prometheus_metrics_use_injected_registry() {
        let registry = Registry::new();
        let metrics = PrometheusPipelineMetrics::new(&registry, "ingest-gateway").unwrap();

        metrics.record_accepted(Source::Tiktok, FunnelStage::Top);
        metrics.record_processed(Source::Tiktok, FunnelStage::Top);
        metrics.observe_processing_time(
            Source::Tiktok,
            FunnelStage::Top,
            Duration::from_millis(3),
        );

        let (content_type, body) = encode_registry(&registry).unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("pipeline_events_processed_total"));
        assert!(text.contains("source=\"tiktok\""));
        assert!(text.contains("service=\"ingest-gateway\""));

        // Nothing leaks into the process-wide registry
        assert!(prometheus::gather()
            .iter()
            .all(|family| family.get_name() != "pipeline_events_processed_total"));
    }

    #[test]
    fn test_second_registration_does_not_fail() {
        let registry = Registry::new();
        let _first = PrometheusPipelineMetrics::new(&registry, "event-collector").unwrap();
        let second = PrometheusPipelineMetrics::new(&registry, "event-collector");
        assert!(second.is_ok());
    }
}
