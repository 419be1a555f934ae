//! Stream and consumer definitions

use crate::subject::subject_matches;
use event_schema::{subject_for, FunnelStage, Source};
use std::time::Duration;

/// Retention ceilings; the oldest entries are evicted once any ceiling is hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_bytes: u64,
    pub max_messages: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_bytes: 2 * 1024 * 1024 * 1024,
            max_messages: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    /// Subject filters captured by this stream
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
}

impl StreamConfig {
    /// One stream per source capturing `events.<source>.*`
    pub fn for_source(source: Source) -> Self {
        Self {
            name: source.stream_name().to_string(),
            subjects: vec![source.subject_filter()],
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn captures(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }

    /// Concrete subjects (one per funnel stage) behind a source stream
    pub fn source_subjects(source: Source) -> Vec<String> {
        [FunnelStage::Top, FunnelStage::Bottom]
            .into_iter()
            .map(|stage| subject_for(source, stage))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable name; subscriptions sharing it form one consumer group
    pub durable_name: String,
    /// Optional narrower filter within the stream
    pub filter_subject: Option<String>,
    /// Total deliveries allowed per message before it is dead-lettered
    pub max_deliver: u32,
    /// Unacknowledged deliveries are redelivered after this long
    pub ack_wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            durable_name: "event-collector".to_string(),
            filter_subject: None,
            max_deliver: 5,
            ack_wait: Duration::from_secs(60),
        }
    }
}

impl ConsumerConfig {
    pub fn for_source(source: Source, group_prefix: &str) -> Self {
        Self {
            durable_name: format!("{}-{}", group_prefix, source.as_str()),
            filter_subject: Some(source.subject_filter()),
            ..Default::default()
        }
    }

    pub fn accepts(&self, subject: &str) -> bool {
        self.filter_subject
            .as_deref()
            .map_or(true, |filter| subject_matches(filter, subject))
    }
}
