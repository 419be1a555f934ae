//! Event materializer
//!
//! Turns an event into its derived rows and issues the three sink writes
//! concurrently. The writes are independent: one failing does not undo the
//! others, and each is idempotent, so the whole message can be retried.

use crate::error::{SinkError, SinkResult};
use crate::records::{collapse_snapshots, DerivedRecords};
use crate::sink::EventSink;
use event_schema::{Event, PublishEnvelope};
use std::slice;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a single materialization changed in the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOutcome {
    /// `false` when the event was already recorded (redelivery)
    pub newly_processed: bool,
    /// `false` when a newer event already owns the snapshot
    pub demographic_updated: bool,
    /// `None` for non-revenue events, otherwise whether a row was inserted
    pub revenue_inserted: Option<bool>,
}

/// Per-write-kind result of a batch materialization
#[derive(Debug)]
pub struct BatchWriteReport {
    pub events: usize,
    pub processed: SinkResult<u64>,
    pub demographics: SinkResult<u64>,
    pub revenue: SinkResult<u64>,
    /// Events that could not be turned into rows
    pub rejected: Vec<String>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.processed.is_ok()
            && self.demographics.is_ok()
            && self.revenue.is_ok()
            && self.rejected.is_empty()
    }

    /// Failed write kinds joined into one line
    pub fn error_summary(&self) -> Option<String> {
        let errors: Vec<String> = [&self.processed, &self.demographics, &self.revenue]
            .into_iter()
            .filter_map(|result| result.as_ref().err().map(SinkError::to_string))
            .chain(self.rejected.iter().cloned())
            .collect();
        (!errors.is_empty()).then(|| errors.join("; "))
    }
}

pub struct EventMaterializer {
    sink: Arc<dyn EventSink>,
}

impl EventMaterializer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn materialize(
        &self,
        event: &Event,
        correlation_id: &str,
    ) -> SinkResult<MaterializeOutcome> {
        let records = DerivedRecords::from_event(event, correlation_id)?;

        let revenue_write = async {
            match &records.revenue {
                Some(transaction) => self
                    .sink
                    .insert_revenue(slice::from_ref(transaction))
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (processed, demographic, revenue) = futures::join!(
            self.sink
                .insert_processed_events(slice::from_ref(&records.processed)),
            self.sink
                .upsert_demographics(slice::from_ref(&records.demographic)),
            revenue_write,
        );

        let outcome = MaterializeOutcome {
            newly_processed: processed? > 0,
            demographic_updated: demographic? > 0,
            revenue_inserted: revenue?.map(|rows| rows > 0),
        };

        if !outcome.newly_processed {
            debug!(
                event_id = %event.event_id,
                correlation_id = %correlation_id,
                "Event already recorded, duplicate skipped"
            );
        }

        Ok(outcome)
    }

    /// Write a batch with one bulk statement per write kind, run concurrently
    pub async fn materialize_batch(&self, envelopes: &[PublishEnvelope]) -> BatchWriteReport {
        let mut processed = Vec::with_capacity(envelopes.len());
        let mut snapshots = Vec::with_capacity(envelopes.len());
        let mut revenue = Vec::new();
        let mut rejected = Vec::new();

        for envelope in envelopes {
            match DerivedRecords::from_event(&envelope.event, &envelope.correlation_id) {
                Ok(records) => {
                    processed.push(records.processed);
                    snapshots.push(records.demographic);
                    revenue.extend(records.revenue);
                }
                Err(e) => rejected.push(format!("{}: {}", envelope.event.event_id, e)),
            }
        }
        let snapshots = collapse_snapshots(snapshots);

        let (processed, demographics, revenue) = futures::join!(
            self.sink.insert_processed_events(&processed),
            self.sink.upsert_demographics(&snapshots),
            self.sink.insert_revenue(&revenue),
        );

        let report = BatchWriteReport {
            events: envelopes.len(),
            processed,
            demographics,
            revenue,
            rejected,
        };

        for (kind, result) in [
            ("processed_events", &report.processed),
            ("user_demographics", &report.demographics),
            ("revenue_transactions", &report.revenue),
        ] {
            if let Err(e) = result {
                warn!(kind, events = report.events, error = %e, "Batch write failed");
            }
        }

        report
    }
}
