//! Durable publisher
//!
//! Writes validated events to `events.<source>.<funnelStage>`.
//!
//! - [`DurablePublisher::publish`]: one event, each attempt raced against the
//!   publish timeout, retried with capped exponential backoff
//! - [`DurablePublisher::publish_many`]: rounds of up to `chunk_size`
//!   concurrent single attempts, no retry, a short pause between rounds;
//!   never fails as a whole
//!
//! A timed-out attempt is abandoned, not cancelled at the broker, so the same
//! event may land twice. The collector's sink absorbs the duplicate.

use crate::error::{AttemptError, PublishError};
use event_log::{DurableLog, Headers, PublishAck};
use event_schema::{Event, PublishEnvelope, Source, CORRELATION_ID_HEADER};
use futures::future::join_all;
use pipeline_metrics::PipelineMetrics;
use resilience::{with_retry, with_timeout, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the event id next to the correlation id
pub const EVENT_ID_HEADER: &str = "event-id";

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub publish_timeout: Duration,
    pub retry: RetryConfig,
    pub chunk_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            chunk_size: 100,
            inter_batch_delay: Duration::from_millis(5),
        }
    }
}

/// Tally of one `publish_many` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

struct PreparedMessage {
    event_id: String,
    subject: String,
    payload: Vec<u8>,
    headers: Headers,
}

pub struct DurablePublisher {
    log: Arc<dyn DurableLog>,
    metrics: Arc<dyn PipelineMetrics>,
    settings: PublisherSettings,
}

impl DurablePublisher {
    pub fn new(
        log: Arc<dyn DurableLog>,
        metrics: Arc<dyn PipelineMetrics>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            log,
            metrics,
            settings,
        }
    }

    /// Publish one event, retrying until the attempt budget is spent
    pub async fn publish(
        &self,
        event: &Event,
        correlation_id: &str,
    ) -> Result<PublishAck, PublishError> {
        let (source, stage) = (event.source(), event.funnel_stage);
        self.metrics.record_accepted(source, stage);

        let message = match prepare(event, correlation_id) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_failed(source, stage);
                return Err(e);
            }
        };

        let result = with_retry(self.settings.retry.clone(), || self.attempt(&message)).await;

        match result {
            Ok(ack) => {
                self.metrics.record_processed(source, stage);
                debug!(
                    event_id = %message.event_id,
                    subject = %message.subject,
                    sequence = ack.sequence,
                    correlation_id = %correlation_id,
                    "Event published"
                );
                Ok(ack)
            }
            Err(e) => {
                self.metrics.record_failed(source, stage);
                let attempts = e.attempts();
                let last_error = e.into_last_error();
                warn!(
                    event_id = %message.event_id,
                    subject = %message.subject,
                    attempts,
                    correlation_id = %correlation_id,
                    error = %last_error,
                    "Event publish failed"
                );
                Err(PublishError::Exhausted {
                    event_id: message.event_id,
                    subject: message.subject,
                    attempts,
                    last_error,
                })
            }
        }
    }

    /// Publish many events of one source; failures are counted, never raised
    pub async fn publish_many(
        &self,
        source: Source,
        events: &[Event],
        correlation_id: &str,
    ) -> PublishSummary {
        let mut summary = PublishSummary::default();
        let chunk_size = self.settings.chunk_size.max(1);
        let rounds = events.len().div_ceil(chunk_size);

        for (round, chunk) in events.chunks(chunk_size).enumerate() {
            let outcomes =
                join_all(chunk.iter().map(|event| self.publish_once(event, correlation_id))).await;

            for (event, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => summary.published += 1,
                    Err(reason) => {
                        summary.failed += 1;
                        summary
                            .errors
                            .push(format!("{}: publish failed: {}", event.event_id, reason));
                    }
                }
            }

            if round + 1 < rounds && !self.settings.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
        }

        info!(
            source = %source,
            published = summary.published,
            failed = summary.failed,
            correlation_id = %correlation_id,
            "Bulk publish finished"
        );

        summary
    }

    /// Single attempt with metrics, used by the bulk path
    async fn publish_once(&self, event: &Event, correlation_id: &str) -> Result<(), String> {
        let (source, stage) = (event.source(), event.funnel_stage);
        self.metrics.record_accepted(source, stage);

        let outcome = match prepare(event, correlation_id) {
            Ok(message) => self
                .attempt(&message)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match &outcome {
            Ok(()) => self.metrics.record_processed(source, stage),
            Err(reason) => {
                self.metrics.record_failed(source, stage);
                warn!(
                    event_id = %event.event_id,
                    correlation_id = %correlation_id,
                    error = %reason,
                    "Bulk publish attempt failed"
                );
            }
        }

        outcome
    }

    async fn attempt(&self, message: &PreparedMessage) -> Result<PublishAck, AttemptError> {
        let timeout = self.settings.publish_timeout;
        let publish = self.log.publish(
            &message.subject,
            message.payload.clone(),
            message.headers.clone(),
        );

        match with_timeout(timeout, publish).await {
            Ok(result) => result.map_err(AttemptError::from),
            Err(_) => Err(AttemptError::Timeout(timeout)),
        }
    }
}

fn prepare(event: &Event, correlation_id: &str) -> Result<PreparedMessage, PublishError> {
    let envelope = PublishEnvelope::new(event.clone(), correlation_id);
    let payload = envelope.to_bytes().map_err(|source| PublishError::Encode {
        event_id: event.event_id.clone(),
        source,
    })?;

    let mut headers = Headers::new();
    headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id.to_string());
    headers.insert(EVENT_ID_HEADER.to_string(), event.event_id.clone());

    Ok(PreparedMessage {
        event_id: event.event_id.clone(),
        subject: envelope.subject(),
        payload,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log::{InMemoryEventLog, StreamConfig};
    use event_schema::{testing, FunnelStage};
    use pipeline_metrics::AtomicPipelineMetrics;

    async fn setup(
        settings: PublisherSettings,
    ) -> (InMemoryEventLog, Arc<AtomicPipelineMetrics>, DurablePublisher) {
        let log = InMemoryEventLog::with_streams(
            Source::ALL.iter().map(|source| StreamConfig::for_source(*source)),
        )
        .await;
        let metrics = Arc::new(AtomicPipelineMetrics::new());
        let publisher = DurablePublisher::new(Arc::new(log.clone()), metrics.clone(), settings);
        (log, metrics, publisher)
    }

    fn fast_retry(max_attempts: u32) -> PublisherSettings {
        PublisherSettings {
            retry: RetryConfig {
                max_attempts,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                jitter: false,
                ..Default::default()
            },
            inter_batch_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_routes_by_source_and_stage() {
        let (log, metrics, publisher) = setup(fast_retry(3)).await;

        publisher
            .publish(&testing::tiktok_purchase("tt-1", Some("12.50")), "corr-1")
            .await
            .unwrap();

        let payloads = log.stored_payloads("TIKTOK_EVENTS").await;
        assert_eq!(payloads.len(), 1);
        let envelope = PublishEnvelope::from_slice(&payloads[0]).unwrap();
        assert_eq!(envelope.correlation_id, "corr-1");
        assert_eq!(envelope.subject(), "events.tiktok.bottom");

        let snapshot = metrics.snapshot(Source::Tiktok, FunnelStage::Bottom);
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.processed, 1);
    }

    #[tokio::test]
    async fn test_publish_recovers_within_attempt_budget() {
        let (log, _, publisher) = setup(fast_retry(3)).await;
        log.fail_next_publishes(2);

        let result = publisher
            .publish(&testing::facebook_top("fb-1"), "corr-1")
            .await;

        assert!(result.is_ok());
        assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 1);
    }

    #[tokio::test]
    async fn test_publish_stops_after_max_attempts() {
        let (log, metrics, publisher) = setup(fast_retry(3)).await;
        log.fail_next_publishes(3);

        let err = publisher
            .publish(&testing::facebook_top("fb-1"), "corr-1")
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 3);

        // The next attempt would have succeeded; none was made
        assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 0);

        let snapshot = metrics.snapshot(Source::Facebook, FunnelStage::Top);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.processed, 0);
    }

    #[tokio::test]
    async fn test_publish_many_counts_failures_without_retry() {
        let (log, _, publisher) = setup(PublisherSettings {
            chunk_size: 4,
            ..fast_retry(3)
        })
        .await;
        let events: Vec<Event> = (0..10)
            .map(|i| testing::facebook_top(&format!("fb-{}", i)))
            .collect();

        log.fail_next_publishes(1);
        let summary = publisher
            .publish_many(Source::Facebook, &events, "corr-bulk")
            .await;

        assert_eq!(summary.published, 9);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 9);
    }

    #[tokio::test]
    async fn test_publish_many_with_broker_down() {
        let (log, _, publisher) = setup(fast_retry(3)).await;
        log.set_available(false);

        let events = vec![testing::facebook_top("fb-1"), testing::facebook_top("fb-2")];
        let summary = publisher
            .publish_many(Source::Facebook, &events, "corr-bulk")
            .await;

        assert_eq!(summary.published, 0);
        assert_eq!(summary.failed, 2);
    }
}
