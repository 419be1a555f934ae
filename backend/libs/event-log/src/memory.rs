//! In-memory durable log
//!
//! Implements the full consumer contract inside one process: streams with
//! retention ceilings, durable consumers with shared cursors, ack-wait expiry,
//! negative acknowledgement, `max_deliver` exhaustion and dead-letter capture.
//! Time is read from `tokio::time`, so paused-clock tests drive ack-wait and
//! retention deterministically.

use crate::{
    ConsumerConfig, DeadLetter, DeadLetterReason, Delivery, DurableLog, Headers, LogError,
    LogResult, NakOutcome, PublishAck, StreamConfig, Subscription,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    headers: Headers,
    stored_at: Instant,
}

impl StoredMessage {
    fn size(&self) -> u64 {
        (self.subject.len()
            + self.payload.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()) as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingDelivery {
    attempt: u32,
    /// Redelivery becomes eligible at this instant
    redeliver_at: Instant,
}

#[derive(Debug)]
struct ConsumerState {
    config: ConsumerConfig,
    /// Next sequence never delivered to this consumer
    cursor: u64,
    pending: BTreeMap<u64, PendingDelivery>,
}

#[derive(Debug)]
struct StreamState {
    config: StreamConfig,
    messages: VecDeque<StoredMessage>,
    bytes: u64,
    next_sequence: u64,
    consumers: HashMap<String, ConsumerState>,
}

impl StreamState {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            bytes: 0,
            next_sequence: 1,
            consumers: HashMap::new(),
        }
    }

    fn first_sequence(&self) -> u64 {
        self.messages
            .front()
            .map(|m| m.sequence)
            .unwrap_or(self.next_sequence)
    }

    fn get(&self, sequence: u64) -> Option<&StoredMessage> {
        let first = self.first_sequence();
        if sequence < first {
            return None;
        }
        self.messages
            .get((sequence - first) as usize)
            .filter(|m| m.sequence == sequence)
    }

    fn append(&mut self, subject: &str, payload: Vec<u8>, headers: Headers) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let message = StoredMessage {
            sequence,
            subject: subject.to_string(),
            payload,
            headers,
            stored_at: Instant::now(),
        };
        self.bytes += message.size();
        self.messages.push_back(message);
        self.enforce_retention();
        sequence
    }

    /// Evict from the front until every ceiling holds
    fn enforce_retention(&mut self) {
        let retention = self.config.retention.clone();
        let now = Instant::now();
        let mut evicted = 0u64;

        while let Some(oldest) = self.messages.front() {
            let over_count = self.messages.len() as u64 > retention.max_messages;
            let over_bytes = self.bytes > retention.max_bytes;
            let expired = now.duration_since(oldest.stored_at) > retention.max_age;

            if !(over_count || over_bytes || expired) {
                break;
            }

            if let Some(message) = self.messages.pop_front() {
                self.bytes -= message.size();
                evicted += 1;
            }
        }

        if evicted > 0 {
            let first = self.first_sequence();
            for consumer in self.consumers.values_mut() {
                consumer.pending.retain(|sequence, _| *sequence >= first);
                consumer.cursor = consumer.cursor.max(first);
            }
            debug!(stream = %self.config.name, evicted, "Retention evicted messages");
        }
    }
}

enum Next {
    Deliver(Delivery),
    Exhausted(DeadLetter),
    Empty { wake_at: Option<Instant> },
}

#[derive(Default)]
struct LogState {
    streams: HashMap<String, StreamState>,
    dead_letters: Vec<DeadLetter>,
}

impl LogState {
    fn stream_for_subject(&mut self, subject: &str) -> Option<&mut StreamState> {
        self.streams
            .values_mut()
            .find(|stream| stream.config.captures(subject))
    }

    fn next_delivery(&mut self, stream_name: &str, durable: &str) -> LogResult<Next> {
        let stream = self
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| LogError::StreamNotFound(stream_name.to_string()))?;
        stream.enforce_retention();

        let now = Instant::now();
        let consumer = stream
            .consumers
            .get(durable)
            .ok_or_else(|| LogError::StreamNotFound(format!("{}/{}", stream_name, durable)))?;
        let max_deliver = consumer.config.max_deliver.max(1);
        let ack_wait = consumer.config.ack_wait;

        // Redeliveries first, lowest sequence first
        let due = consumer
            .pending
            .iter()
            .find(|(_, p)| p.redeliver_at <= now)
            .map(|(sequence, p)| (*sequence, *p));

        if let Some((sequence, pending)) = due {
            let message = stream.get(sequence).cloned();
            let consumer = match stream.consumers.get_mut(durable) {
                Some(consumer) => consumer,
                None => return Ok(Next::Empty { wake_at: None }),
            };

            let Some(message) = message else {
                consumer.pending.remove(&sequence);
                return Ok(Next::Empty { wake_at: Some(now) });
            };

            if pending.attempt >= max_deliver {
                consumer.pending.remove(&sequence);
                return Ok(Next::Exhausted(DeadLetter {
                    stream: stream_name.to_string(),
                    subject: message.subject,
                    payload: message.payload,
                    headers: message.headers,
                    attempts: pending.attempt,
                    reason: DeadLetterReason::MaxDeliverExceeded,
                }));
            }

            let attempt = pending.attempt + 1;
            consumer.pending.insert(
                sequence,
                PendingDelivery {
                    attempt,
                    redeliver_at: now + ack_wait,
                },
            );
            return Ok(Next::Deliver(to_delivery(stream_name, &message, attempt)));
        }

        // Then the next message never delivered to this consumer
        let next_sequence = stream.next_sequence;
        let start = consumer.cursor.max(stream.first_sequence());
        let filter = consumer.config.clone();
        let found = (start..next_sequence)
            .filter_map(|sequence| stream.get(sequence))
            .find(|message| filter.accepts(&message.subject))
            .cloned();

        let wake_at = consumer.pending.values().map(|p| p.redeliver_at).min();
        let consumer = match stream.consumers.get_mut(durable) {
            Some(consumer) => consumer,
            None => return Ok(Next::Empty { wake_at: None }),
        };

        match found {
            Some(message) => {
                consumer.cursor = message.sequence + 1;
                consumer.pending.insert(
                    message.sequence,
                    PendingDelivery {
                        attempt: 1,
                        redeliver_at: now + ack_wait,
                    },
                );
                Ok(Next::Deliver(to_delivery(stream_name, &message, 1)))
            }
            None => {
                consumer.cursor = next_sequence;
                Ok(Next::Empty { wake_at })
            }
        }
    }
}

fn to_delivery(stream: &str, message: &StoredMessage, attempt: u32) -> Delivery {
    Delivery {
        stream: stream.to_string(),
        subject: message.subject.clone(),
        partition: 0,
        sequence: message.sequence,
        payload: message.payload.clone(),
        headers: message.headers.clone(),
        attempt,
    }
}

/// Single-process implementation of [`DurableLog`]
#[derive(Clone)]
pub struct InMemoryEventLog {
    state: Arc<Mutex<LogState>>,
    notify: Arc<Notify>,
    available: Arc<AtomicBool>,
    failing_publishes: Arc<AtomicU32>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            notify: Arc::new(Notify::new()),
            available: Arc::new(AtomicBool::new(true)),
            failing_publishes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Log with one stream per entry in `streams`
    pub async fn with_streams(streams: impl IntoIterator<Item = StreamConfig>) -> Self {
        let log = Self::new();
        for stream in streams {
            log.add_stream(stream).await;
        }
        log
    }

    /// Create or update a stream definition; stored messages are kept
    pub async fn add_stream(&self, config: StreamConfig) {
        let mut state = self.state.lock().await;
        match state.streams.get_mut(&config.name) {
            Some(stream) => {
                stream.config = config;
                stream.enforce_retention();
            }
            None => {
                state
                    .streams
                    .insert(config.name.clone(), StreamState::new(config));
            }
        }
    }

    /// Simulate a broker outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject the next `count` publishes with [`LogError::Unavailable`]
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub async fn stream_len(&self, stream: &str) -> usize {
        self.state
            .lock()
            .await
            .streams
            .get(stream)
            .map(|s| s.messages.len())
            .unwrap_or(0)
    }

    pub async fn stream_bytes(&self, stream: &str) -> u64 {
        self.state
            .lock()
            .await
            .streams
            .get(stream)
            .map(|s| s.bytes)
            .unwrap_or(0)
    }

    /// Payloads currently stored in `stream`, oldest first
    pub async fn stored_payloads(&self, stream: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .streams
            .get(stream)
            .map(|s| s.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DurableLog for InMemoryEventLog {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> LogResult<PublishAck> {
        if !self.available.load(Ordering::SeqCst) || self.take_injected_failure() {
            return Err(LogError::Unavailable("in-memory broker offline".to_string()));
        }

        let ack = {
            let mut state = self.state.lock().await;
            let stream = state
                .stream_for_subject(subject)
                .ok_or_else(|| LogError::NoStreamForSubject(subject.to_string()))?;
            let sequence = stream.append(subject, payload, headers);
            PublishAck {
                stream: stream.config.name.clone(),
                partition: 0,
                sequence,
            }
        };

        self.notify.notify_waiters();
        Ok(ack)
    }

    async fn subscribe(
        &self,
        stream: &StreamConfig,
        consumer: &ConsumerConfig,
    ) -> LogResult<Box<dyn Subscription>> {
        let mut state = self.state.lock().await;
        let stream_state = state
            .streams
            .get_mut(&stream.name)
            .ok_or_else(|| LogError::StreamNotFound(stream.name.clone()))?;

        let first = stream_state.first_sequence();
        stream_state
            .consumers
            .entry(consumer.durable_name.clone())
            .and_modify(|existing| existing.config = consumer.clone())
            .or_insert_with(|| ConsumerState {
                config: consumer.clone(),
                cursor: first,
                pending: BTreeMap::new(),
            });

        Ok(Box::new(InMemorySubscription {
            log: self.clone(),
            stream: stream.name.clone(),
            durable: consumer.durable_name.clone(),
        }))
    }

    async fn health_check(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    log: InMemoryEventLog,
    stream: String,
    durable: String,
}

impl InMemorySubscription {
    async fn remove_pending(&self, sequence: u64) -> LogResult<Option<PendingDelivery>> {
        let mut state = self.log.state.lock().await;
        let consumer = state
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.durable))
            .ok_or_else(|| LogError::StreamNotFound(self.stream.clone()))?;
        Ok(consumer.pending.remove(&sequence))
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason) {
        warn!(
            stream = %self.stream,
            subject = %delivery.subject,
            sequence = delivery.sequence,
            attempts = delivery.attempt,
            reason = %reason.as_header_value(),
            "Message dead-lettered"
        );
        self.log.state.lock().await.dead_letters.push(DeadLetter {
            stream: self.stream.clone(),
            subject: delivery.subject.clone(),
            payload: delivery.payload.clone(),
            headers: delivery.headers.clone(),
            attempts: delivery.attempt,
            reason,
        });
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn fetch(&mut self, wait: Duration) -> LogResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.log.notify.notified();

            let next = {
                let mut state = self.log.state.lock().await;
                let next = state.next_delivery(&self.stream, &self.durable)?;
                if let Next::Exhausted(dead) = &next {
                    warn!(
                        stream = %self.stream,
                        subject = %dead.subject,
                        attempts = dead.attempts,
                        "Ack wait expired on final delivery, message dead-lettered"
                    );
                    state.dead_letters.push(dead.clone());
                }
                next
            };

            let wake_at = match next {
                Next::Deliver(delivery) => return Ok(Some(delivery)),
                Next::Exhausted(_) => continue,
                Next::Empty { wake_at } => wake_at,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let sleep_until = wake_at.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(sleep_until) => {}
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> LogResult<()> {
        self.remove_pending(delivery.sequence).await?;
        Ok(())
    }

    async fn nak(&mut self, delivery: &Delivery) -> LogResult<NakOutcome> {
        let outcome = {
            let mut state = self.log.state.lock().await;
            let consumer = state
                .streams
                .get_mut(&self.stream)
                .and_then(|s| s.consumers.get_mut(&self.durable))
                .ok_or_else(|| LogError::StreamNotFound(self.stream.clone()))?;

            if delivery.attempt >= consumer.config.max_deliver.max(1) {
                consumer.pending.remove(&delivery.sequence);
                NakOutcome::DeadLettered
            } else {
                if let Some(pending) = consumer.pending.get_mut(&delivery.sequence) {
                    pending.redeliver_at = Instant::now();
                }
                NakOutcome::Redelivering
            }
        };

        match outcome {
            NakOutcome::DeadLettered => {
                self.dead_letter(delivery, DeadLetterReason::MaxDeliverExceeded)
                    .await
            }
            NakOutcome::Redelivering => self.log.notify.notify_waiters(),
        }
        Ok(outcome)
    }

    async fn term(&mut self, delivery: &Delivery, reason: &str) -> LogResult<()> {
        self.remove_pending(delivery.sequence).await?;
        self.dead_letter(delivery, DeadLetterReason::Terminated(reason.to_string()))
            .await;
        Ok(())
    }
}
