//! # Durable Event Log
//!
//! Interface between the pipeline and its append-only, subject-partitioned
//! log, plus two adapters:
//!
//! - [`KafkaEventLog`]: production adapter; one topic per subject, consumer
//!   groups per source stream, redelivery and dead letters implemented with
//!   re-publishes and manual offset commits
//! - [`InMemoryEventLog`]: single-process log with the full consumer contract
//!   (retention ceilings, ack wait, max deliver, dead-letter capture), used by
//!   tests and local runs
//!
//! ## Delivery contract
//!
//! ```text
//! publish(subject) ──► stream (captures events.<source>.*)
//!                          │
//!                 fetch ◄──┘  Delivery { attempt = 1, 2, ... }
//!                   │
//!         ack ──────┼──── nak ─────────────── term
//!      (removed)    │  attempt < max_deliver?    (dead letter)
//!                   │    yes: redeliver later
//!                   │    no:  dead letter
//! ```
//!
//! Publishing the same payload twice produces two log entries; the log never
//! deduplicates.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

mod config;
mod error;
pub mod kafka;
pub mod memory;
pub mod subject;

pub use config::{ConsumerConfig, RetentionPolicy, StreamConfig};
pub use error::{LogError, LogResult};
pub use kafka::{KafkaEventLog, KafkaLogConfig};
pub use memory::InMemoryEventLog;

/// Header carrying the 1-based delivery attempt on redelivered messages
pub const DELIVERY_ATTEMPT_HEADER: &str = "delivery-attempt";
/// Header carrying the reason a message was dead-lettered
pub const DEAD_LETTER_REASON_HEADER: &str = "dead-letter-reason";
/// Header carrying the subject a dead-lettered message was published to
pub const ORIGINAL_SUBJECT_HEADER: &str = "original-subject";

pub type Headers = BTreeMap<String, String>;

/// Broker acknowledgement of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub partition: i32,
    pub sequence: u64,
}

/// One delivery of a stored message to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub stream: String,
    pub subject: String,
    pub partition: i32,
    pub sequence: u64,
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// Broker-tracked attempt counter, starting at 1
    pub attempt: u32,
}

impl Delivery {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Result of a negative acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakOutcome {
    /// Message will be delivered again
    Redelivering,
    /// `max_deliver` reached; message moved to the dead-letter sink
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    MaxDeliverExceeded,
    Terminated(String),
}

impl DeadLetterReason {
    pub fn as_header_value(&self) -> String {
        match self {
            DeadLetterReason::MaxDeliverExceeded => "max_deliver_exceeded".to_string(),
            DeadLetterReason::Terminated(reason) => format!("terminated: {}", reason),
        }
    }
}

/// Message removed from its stream without being acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub stream: String,
    pub subject: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub attempts: u32,
    pub reason: DeadLetterReason,
}

/// Append side and subscription factory of the durable log
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Append one message. Fails when no stream captures `subject` or the
    /// broker rejects the write.
    async fn publish(&self, subject: &str, payload: Vec<u8>, headers: Headers)
        -> LogResult<PublishAck>;

    /// Bind a pull subscription for a durable consumer on `stream`
    ///
    /// Subscriptions sharing a durable name compete for the same messages.
    async fn subscribe(
        &self,
        stream: &StreamConfig,
        consumer: &ConsumerConfig,
    ) -> LogResult<Box<dyn Subscription>>;

    /// `true` when the broker answers metadata requests
    async fn health_check(&self) -> bool;
}

/// Pull subscription with explicit per-message acknowledgement
#[async_trait]
pub trait Subscription: Send {
    /// Next available delivery, waiting at most `wait`
    async fn fetch(&mut self, wait: Duration) -> LogResult<Option<Delivery>>;

    /// Processing succeeded; the message is never delivered again
    async fn ack(&mut self, delivery: &Delivery) -> LogResult<()>;

    /// Processing should be retried later
    async fn nak(&mut self, delivery: &Delivery) -> LogResult<NakOutcome>;

    /// Processing can never succeed; drop the message
    async fn term(&mut self, delivery: &Delivery, reason: &str) -> LogResult<()>;
}
