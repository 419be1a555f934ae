//! # Stream Consumer
//!
//! Pulls messages for one source stream from the durable log, runs each one
//! through an [`EventHandler`] under a processing timeout, and turns the
//! outcome into an ack, a nak or a term.
//!
//! Delivery is at-least-once. The handler is expected to write idempotently
//! (dedup on `eventId`), so a message processed twice has the effect of
//! processing it once.
//!
//! ## Architecture
//!
//! ```text
//! DurableLog ─► Subscription.fetch ─► PublishEnvelope::from_slice
//!                                         │ parse error ─► term
//!                                         ▼
//!                              with_timeout(handler.handle)
//!                                         │
//!                          decide(outcome) ─► ack / nak / term
//!                                         │
//!                                  PipelineMetrics
//! ```
//!
//! Messages are processed strictly one at a time per consumer, which keeps
//! per-subject ordering. Bounded redelivery is enforced by the log
//! (`max_deliver`); the consumer only observes exhaustion through
//! [`NakOutcome::DeadLettered`].
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{StreamConsumer, ConsumerSettings};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let consumer = StreamConsumer::new(log, stream, consumer_config, handler, metrics);
//! let task = tokio::spawn(async move { consumer.run(shutdown_rx).await });
//!
//! // later
//! shutdown_tx.send(true)?;
//! let stats = task.await??;
//! ```

use async_trait::async_trait;
use event_log::{
    ConsumerConfig, Delivery, DurableLog, NakOutcome, StreamConfig, Subscription,
};
use event_schema::{parse_subject, FunnelStage, PublishEnvelope, Source, CORRELATION_ID_HEADER};
use pipeline_metrics::PipelineMetrics;
use resilience::{with_timeout_result, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

mod error;
mod state;

pub use error::{ConsumerError, ConsumerResult, ProcessingError};
pub use state::{decide, AckDecision, DeliveryState};

/// Business processing for one decoded message
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &PublishEnvelope) -> Result<(), ProcessingError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Budget for one handler call; exceeding it naks the message
    pub processing_timeout: Duration,
    /// Maximum time one pull waits for a message
    pub fetch_wait: Duration,
    /// Pause after a transient fetch failure
    pub error_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(30),
            fetch_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Per-run tally of final decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub redelivered: u64,
    pub terminated: u64,
    /// Decision could not be sent; the log will redeliver on its own
    pub unresolved: u64,
}

impl ConsumerStats {
    fn record(&mut self, state: DeliveryState) {
        match state {
            DeliveryState::Acked => self.acked += 1,
            DeliveryState::Redelivering => self.redelivered += 1,
            DeliveryState::Terminated => self.terminated += 1,
            DeliveryState::Delivered => self.unresolved += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.acked + self.redelivered + self.terminated + self.unresolved
    }
}

pub struct StreamConsumer {
    log: Arc<dyn DurableLog>,
    stream: StreamConfig,
    consumer: ConsumerConfig,
    handler: Arc<dyn EventHandler>,
    metrics: Arc<dyn PipelineMetrics>,
    settings: ConsumerSettings,
}

impl StreamConsumer {
    pub fn new(
        log: Arc<dyn DurableLog>,
        stream: StreamConfig,
        consumer: ConsumerConfig,
        handler: Arc<dyn EventHandler>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            log,
            stream,
            consumer,
            handler,
            metrics,
            settings: ConsumerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Consume until `shutdown` flips to `true` or its sender is dropped
    ///
    /// A message already handed to the handler is always finished before the
    /// loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerResult<ConsumerStats> {
        let mut subscription = self.log.subscribe(&self.stream, &self.consumer).await?;
        let mut stats = ConsumerStats::default();

        info!(
            stream = %self.stream.name,
            durable = %self.consumer.durable_name,
            max_deliver = self.consumer.max_deliver,
            processing_timeout_ms = self.settings.processing_timeout.as_millis() as u64,
            "Stream consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                fetched = subscription.fetch(self.settings.fetch_wait) => fetched,
            };

            match fetched {
                Ok(Some(delivery)) => {
                    let state = self.process_delivery(subscription.as_mut(), &delivery).await;
                    stats.record(state);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(stream = %self.stream.name, error = %e, "Fetch failed, backing off");
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
                Err(e) => {
                    error!(stream = %self.stream.name, error = %e, "Stream consumer stopped");
                    return Err(e.into());
                }
            }
        }

        info!(
            stream = %self.stream.name,
            acked = stats.acked,
            redelivered = stats.redelivered,
            terminated = stats.terminated,
            "Stream consumer stopped"
        );

        Ok(stats)
    }

    /// Fetch and process at most one message
    pub async fn poll_once(
        &self,
        subscription: &mut dyn Subscription,
    ) -> ConsumerResult<Option<DeliveryState>> {
        match subscription.fetch(self.settings.fetch_wait).await? {
            Some(delivery) => Ok(Some(self.process_delivery(subscription, &delivery).await)),
            None => Ok(None),
        }
    }

    /// Decode, handle and acknowledge one delivery
    pub async fn process_delivery(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
    ) -> DeliveryState {
        let correlation_id = delivery.header(CORRELATION_ID_HEADER).unwrap_or("unknown");

        let envelope = match PublishEnvelope::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    subject = %delivery.subject,
                    sequence = delivery.sequence,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Undecodable message, terminating"
                );
                let labels = parse_subject(&delivery.subject);
                let decision = AckDecision::Term(format!("malformed payload: {}", e));
                return self.apply(subscription, delivery, decision, labels).await;
            }
        };

        let event = &envelope.event;
        let labels = (event.source(), event.funnel_stage);

        debug!(
            event_id = %event.event_id,
            subject = %delivery.subject,
            attempt = delivery.attempt,
            correlation_id = %envelope.correlation_id,
            "Processing message"
        );

        let started = Instant::now();
        let outcome = match with_timeout_result(
            self.settings.processing_timeout,
            self.handler.handle(&envelope),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(TimeoutError::Elapsed(budget)) => Err(ProcessingError::Timeout(budget)),
            Err(TimeoutError::OperationFailed(e)) => Err(e),
        };
        self.metrics
            .observe_processing_time(labels.0, labels.1, started.elapsed());

        if let Err(e) = &outcome {
            warn!(
                event_id = %event.event_id,
                subject = %delivery.subject,
                attempt = delivery.attempt,
                correlation_id = %envelope.correlation_id,
                retryable = e.is_retryable(),
                error = %e,
                "Event processing failed"
            );
        }

        let decision = decide(&outcome);
        self.apply(subscription, delivery, decision, Some(labels))
            .await
    }

    async fn apply(
        &self,
        subscription: &mut dyn Subscription,
        delivery: &Delivery,
        decision: AckDecision,
        labels: Option<(Source, FunnelStage)>,
    ) -> DeliveryState {
        let state = match decision {
            AckDecision::Ack => match subscription.ack(delivery).await {
                Ok(()) => DeliveryState::Acked,
                Err(e) => {
                    error!(
                        subject = %delivery.subject,
                        sequence = delivery.sequence,
                        error = %e,
                        "Ack failed"
                    );
                    return DeliveryState::Delivered;
                }
            },
            AckDecision::Nak => match subscription.nak(delivery).await {
                Ok(NakOutcome::Redelivering) => DeliveryState::Redelivering,
                Ok(NakOutcome::DeadLettered) => {
                    warn!(
                        subject = %delivery.subject,
                        sequence = delivery.sequence,
                        attempts = delivery.attempt,
                        "Redelivery exhausted, message dead-lettered"
                    );
                    DeliveryState::Terminated
                }
                Err(e) => {
                    error!(
                        subject = %delivery.subject,
                        sequence = delivery.sequence,
                        error = %e,
                        "Nak failed"
                    );
                    return DeliveryState::Delivered;
                }
            },
            AckDecision::Term(reason) => match subscription.term(delivery, &reason).await {
                Ok(()) => DeliveryState::Terminated,
                Err(e) => {
                    error!(
                        subject = %delivery.subject,
                        sequence = delivery.sequence,
                        error = %e,
                        "Term failed"
                    );
                    return DeliveryState::Delivered;
                }
            },
        };

        if let Some((source, stage)) = labels {
            match state {
                DeliveryState::Acked => self.metrics.record_processed(source, stage),
                DeliveryState::Redelivering => self.metrics.record_redelivered(source, stage),
                DeliveryState::Terminated => {
                    self.metrics.record_failed(source, stage);
                    self.metrics.record_dead_lettered(source, stage);
                }
                DeliveryState::Delivered => {}
            }
        }

        state
    }
}
