use super::EventSink;
use crate::error::{SinkError, SinkResult};
use crate::records::{ProcessedEventRecord, RevenueTransaction, UserDemographicSnapshot};
use async_trait::async_trait;
use event_schema::Source;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct SinkState {
    processed: HashMap<String, ProcessedEventRecord>,
    demographics: HashMap<(String, Source), UserDemographicSnapshot>,
    revenue: HashMap<String, RevenueTransaction>,
}

/// Sink with the same dedup and upsert rules as the PostgreSQL tables
#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    state: Arc<Mutex<SinkState>>,
    unavailable: Arc<AtomicBool>,
    revenue_unavailable: Arc<AtomicBool>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write with a transient error while `false`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail only revenue writes while `false`
    pub fn set_revenue_available(&self, available: bool) {
        self.revenue_unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }

    pub async fn processed(&self, event_id: &str) -> Option<ProcessedEventRecord> {
        self.state.lock().await.processed.get(event_id).cloned()
    }

    pub async fn demographics_count(&self) -> usize {
        self.state.lock().await.demographics.len()
    }

    pub async fn demographic(
        &self,
        user_id: &str,
        source: Source,
    ) -> Option<UserDemographicSnapshot> {
        self.state
            .lock()
            .await
            .demographics
            .get(&(user_id.to_string(), source))
            .cloned()
    }

    pub async fn revenue_count(&self) -> usize {
        self.state.lock().await.revenue.len()
    }

    pub async fn revenue(&self, event_id: &str) -> Option<RevenueTransaction> {
        self.state.lock().await.revenue.get(event_id).cloned()
    }

    fn check_available(&self) -> SinkResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("in-memory sink offline".to_string()));
        }
        Ok(())
    }
}

fn merge_snapshot(stored: &mut UserDemographicSnapshot, incoming: &UserDemographicSnapshot) {
    fn keep<T: Clone>(stored: &mut Option<T>, incoming: &Option<T>) {
        if incoming.is_some() {
            stored.clone_from(incoming);
        }
    }

    keep(&mut stored.name, &incoming.name);
    keep(&mut stored.age, &incoming.age);
    keep(&mut stored.gender, &incoming.gender);
    keep(&mut stored.country, &incoming.country);
    keep(&mut stored.city, &incoming.city);
    keep(&mut stored.username, &incoming.username);
    keep(&mut stored.followers, &incoming.followers);
    stored.last_event_at = incoming.last_event_at;
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn insert_processed_events(&self, records: &[ProcessedEventRecord]) -> SinkResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut inserted = 0;

        for record in records {
            if !state.processed.contains_key(&record.event_id) {
                state
                    .processed
                    .insert(record.event_id.clone(), record.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn upsert_demographics(&self, snapshots: &[UserDemographicSnapshot]) -> SinkResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let mut affected = 0;

        for snapshot in snapshots {
            match state.demographics.get_mut(&snapshot.key()) {
                Some(stored) if stored.last_event_at <= snapshot.last_event_at => {
                    merge_snapshot(stored, snapshot);
                    affected += 1;
                }
                Some(_) => {}
                None => {
                    state.demographics.insert(snapshot.key(), snapshot.clone());
                    affected += 1;
                }
            }
        }

        Ok(affected)
    }

    async fn insert_revenue(&self, transactions: &[RevenueTransaction]) -> SinkResult<u64> {
        self.check_available()?;
        if self.revenue_unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("revenue table offline".to_string()));
        }
        let mut state = self.state.lock().await;
        let mut inserted = 0;

        for transaction in transactions {
            if !state.revenue.contains_key(&transaction.event_id) {
                state
                    .revenue
                    .insert(transaction.event_id.clone(), transaction.clone());
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    async fn health_check(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}
