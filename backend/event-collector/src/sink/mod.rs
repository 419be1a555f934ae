//! Idempotent sink
//!
//! Every write is safe to repeat: inserts skip rows whose `event_id` already
//! exists and the demographic upsert is keyed by `(user_id, source)`. A
//! duplicate is reported as zero affected rows, never as an error.

mod memory;
mod postgres;

pub use memory::InMemoryEventSink;
pub use postgres::{PgEventSink, MIGRATOR};

use crate::error::SinkResult;
use crate::records::{ProcessedEventRecord, RevenueTransaction, UserDemographicSnapshot};
use async_trait::async_trait;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Insert audit rows, skipping existing `event_id`s; returns rows inserted
    async fn insert_processed_events(&self, records: &[ProcessedEventRecord]) -> SinkResult<u64>;

    /// Insert-or-update by `(user_id, source)`
    ///
    /// A stored snapshot is only overwritten by an event at least as recent
    /// as its `last_event_at`. Callers pass at most one snapshot per key.
    async fn upsert_demographics(&self, snapshots: &[UserDemographicSnapshot]) -> SinkResult<u64>;

    /// Insert revenue rows, skipping existing `event_id`s; returns rows inserted
    async fn insert_revenue(&self, transactions: &[RevenueTransaction]) -> SinkResult<u64>;

    async fn health_check(&self) -> bool;
}
