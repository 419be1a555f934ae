//! Ingress batcher
//!
//! Validates webhook payloads and feeds the publisher:
//!
//! ```text
//! [Value; N] ─► validate each ─► valid events ─► chunks of batch_size
//!                   │                                   │
//!             failed + error                  group by source
//!                                                       │
//!                                    publish_many per source (concurrent)
//! ```
//!
//! An invalid element never aborts the rest of the batch.

use crate::publisher::DurablePublisher;
use event_schema::{BatchResult, Event, FunnelStage, Source};
use futures::future::join_all;
use pipeline_metrics::PipelineMetrics;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BatcherSettings {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub max_bulk_events: usize,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            inter_batch_delay: Duration::from_millis(10),
            max_bulk_events: 50_000,
        }
    }
}

/// Result of a single-event submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleOutcome {
    Published,
    Invalid(String),
    PublishFailed,
}

/// Result of a bulk submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Completed(BatchResult),
    /// More elements than `max_bulk_events`; nothing was processed
    TooLarge { received: usize, limit: usize },
}

/// Validated events plus the tally of rejected elements
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub events: Vec<Event>,
    pub rejected: BatchResult,
    /// Source and stage of rejected elements, where the raw JSON names them
    pub rejected_labels: Vec<(Source, FunnelStage)>,
}

/// Validate every element independently
pub fn validate_all(values: Vec<Value>) -> ValidatedBatch {
    let mut batch = ValidatedBatch {
        events: Vec::with_capacity(values.len()),
        ..Default::default()
    };

    for (index, value) in values.into_iter().enumerate() {
        let event_id = value
            .get("eventId")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let labels = raw_labels(&value);

        match Event::from_value(value) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                batch
                    .rejected
                    .record_failure(format!("event[{}] ({}): {}", index, event_id, e));
                batch.rejected_labels.extend(labels);
            }
        }
    }

    batch
}

/// Split `events` into consecutive sub-batches of at most `size`
pub fn chunk(events: Vec<Event>, size: usize) -> Vec<Vec<Event>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(events.len().div_ceil(size));
    let mut iter = events.into_iter().peekable();

    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }

    chunks
}

/// Group a sub-batch by source, keeping arrival order within each group
pub fn group_by_source(events: Vec<Event>) -> BTreeMap<Source, Vec<Event>> {
    let mut groups: BTreeMap<Source, Vec<Event>> = BTreeMap::new();
    for event in events {
        groups.entry(event.source()).or_default().push(event);
    }
    groups
}

/// Best-effort labels for an element that failed validation
fn raw_labels(value: &Value) -> Option<(Source, FunnelStage)> {
    let source = value.get("source")?.as_str()?.parse().ok()?;
    let stage = value.get("funnelStage")?.as_str()?.parse().ok()?;
    Some((source, stage))
}

pub struct IngressBatcher {
    publisher: Arc<DurablePublisher>,
    metrics: Arc<dyn PipelineMetrics>,
    settings: BatcherSettings,
}

impl IngressBatcher {
    pub fn new(
        publisher: Arc<DurablePublisher>,
        metrics: Arc<dyn PipelineMetrics>,
        settings: BatcherSettings,
    ) -> Self {
        Self {
            publisher,
            metrics,
            settings,
        }
    }

    /// Validate and publish one webhook event (publish retried)
    pub async fn ingest_single(&self, value: Value, correlation_id: &str) -> SingleOutcome {
        let labels = raw_labels(&value);

        let event = match Event::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                self.record_rejected(labels);
                warn!(correlation_id = %correlation_id, error = %e, "Rejected invalid event");
                return SingleOutcome::Invalid(e.to_string());
            }
        };

        match self.publisher.publish(&event, correlation_id).await {
            Ok(_) => SingleOutcome::Published,
            Err(_) => SingleOutcome::PublishFailed,
        }
    }

    /// Validate, chunk and publish a bulk submission
    pub async fn ingest_bulk(&self, values: Vec<Value>, correlation_id: &str) -> BulkOutcome {
        let received = values.len();
        if received > self.settings.max_bulk_events {
            warn!(
                received,
                limit = self.settings.max_bulk_events,
                correlation_id = %correlation_id,
                "Bulk submission over limit"
            );
            return BulkOutcome::TooLarge {
                received,
                limit: self.settings.max_bulk_events,
            };
        }

        let ValidatedBatch {
            events,
            rejected: mut result,
            rejected_labels,
        } = validate_all(values);
        for (source, stage) in rejected_labels {
            self.metrics.record_failed(source, stage);
        }

        let chunks = chunk(events, self.settings.batch_size);
        let total_chunks = chunks.len();

        for (index, sub_batch) in chunks.into_iter().enumerate() {
            let groups = group_by_source(sub_batch);

            let summaries = join_all(groups.iter().map(|(source, events)| {
                self.publisher.publish_many(*source, events, correlation_id)
            }))
            .await;

            for summary in summaries {
                result.processed += summary.published;
                result.failed += summary.failed;
                result.errors.extend(summary.errors);
            }

            if index + 1 < total_chunks && !self.settings.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
        }

        info!(
            received,
            processed = result.processed,
            failed = result.failed,
            correlation_id = %correlation_id,
            "Bulk submission processed"
        );

        BulkOutcome::Completed(result)
    }

    fn record_rejected(&self, labels: Option<(Source, FunnelStage)>) {
        if let Some((source, stage)) = labels {
            self.metrics.record_failed(source, stage);
        }
    }
}
