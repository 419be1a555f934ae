use crate::materializer::EventMaterializer;
use async_trait::async_trait;
use event_schema::PublishEnvelope;
use idempotent_consumer::{EventHandler, ProcessingError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stream handler writing each event to the sink
///
/// Transient sink failures are redelivered, everything else terminates.
pub struct MaterializingHandler {
    materializer: Arc<EventMaterializer>,
}

impl MaterializingHandler {
    pub fn new(materializer: Arc<EventMaterializer>) -> Self {
        Self { materializer }
    }
}

#[async_trait]
impl EventHandler for MaterializingHandler {
    async fn handle(&self, envelope: &PublishEnvelope) -> Result<(), ProcessingError> {
        let event = &envelope.event;

        match self
            .materializer
            .materialize(event, &envelope.correlation_id)
            .await
        {
            Ok(outcome) => {
                debug!(
                    event_id = %event.event_id,
                    source = %event.source(),
                    correlation_id = %envelope.correlation_id,
                    newly_processed = outcome.newly_processed,
                    revenue = ?outcome.revenue_inserted,
                    "Event materialized"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    correlation_id = %envelope.correlation_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Event materialization failed"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemoryEventSink;
    use event_schema::testing;

    fn handler(sink: &InMemoryEventSink) -> MaterializingHandler {
        MaterializingHandler::new(Arc::new(EventMaterializer::new(Arc::new(sink.clone()))))
    }

    #[tokio::test]
    async fn test_redelivered_envelope_is_absorbed() {
        let sink = InMemoryEventSink::new();
        let handler = handler(&sink);
        let envelope = PublishEnvelope::new(testing::facebook_purchase("fb-1", "10.00"), "corr-1");

        for _ in 0..3 {
            handler.handle(&envelope).await.unwrap();
        }

        assert_eq!(sink.processed_count().await, 1);
        assert_eq!(sink.revenue_count().await, 1);
    }

    #[tokio::test]
    async fn test_offline_sink_is_transient() {
        let sink = InMemoryEventSink::new();
        sink.set_available(false);

        let err = handler(&sink)
            .handle(&PublishEnvelope::new(testing::tiktok_top("tt-1"), "corr-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessingError::Transient(_)));
    }
}
