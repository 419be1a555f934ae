//! Event schema for the funnel ingestion pipeline
//!
//! Defines the webhook event model shared by the gateway, the collectors and
//! the reporting read path:
//! - [`Event`]: validated event with a closed per-source engagement union
//! - [`PublishEnvelope`]: event plus correlation id and publish time, the
//!   payload written to the durable log
//! - [`BatchResult`]: per-batch tally returned by bulk operations
//!
//! ## Subjects
//!
//! Events are routed to `events.<source>.<funnelStage>`. Each source owns one
//! stream that captures `events.<source>.*`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod error;
mod event;
pub mod facebook;
pub mod tiktok;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ValidationError, ValidationResult, MAX_EVENT_ID_LEN};
pub use event::{parse_purchase_amount, Event, EventPayload};

/// Header carrying the correlation id on durable log messages
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Prefix shared by every event subject
pub const SUBJECT_PREFIX: &str = "events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Facebook,
    Tiktok,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Facebook, Source::Tiktok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Facebook => "facebook",
            Source::Tiktok => "tiktok",
        }
    }

    /// Name of the stream that owns this source's subjects
    pub fn stream_name(&self) -> &'static str {
        match self {
            Source::Facebook => "FACEBOOK_EVENTS",
            Source::Tiktok => "TIKTOK_EVENTS",
        }
    }

    /// Wildcard filter matching every funnel stage of this source
    pub fn subject_filter(&self) -> String {
        format!("{}.{}.*", SUBJECT_PREFIX, self.as_str())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" => Ok(Source::Facebook),
            "tiktok" => Ok(Source::Tiktok),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunnelStage {
    Top,
    Bottom,
}

impl FunnelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::Top => "top",
            FunnelStage::Bottom => "bottom",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(FunnelStage::Top),
            "bottom" => Ok(FunnelStage::Bottom),
            other => Err(format!("unknown funnel stage '{}'", other)),
        }
    }
}

pub fn subject_for(source: Source, stage: FunnelStage) -> String {
    format!("{}.{}.{}", SUBJECT_PREFIX, source.as_str(), stage.as_str())
}

/// Inverse of [`subject_for`]; `None` for anything outside `events.<source>.<stage>`
pub fn parse_subject(subject: &str) -> Option<(Source, FunnelStage)> {
    let mut parts = subject.split('.');
    if parts.next()? != SUBJECT_PREFIX {
        return None;
    }
    let source = parts.next()?.parse().ok()?;
    let stage = parts.next()?.parse().ok()?;
    match parts.next() {
        None => Some((source, stage)),
        Some(_) => None,
    }
}

/// Payload written to the durable log for one event
///
/// Built once per publish call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEnvelope {
    pub event: Event,
    pub correlation_id: String,
    pub published_at: DateTime<Utc>,
}

impl PublishEnvelope {
    pub fn new(event: Event, correlation_id: impl Into<String>) -> Self {
        Self {
            event,
            correlation_id: correlation_id.into(),
            published_at: Utc::now(),
        }
    }

    pub fn subject(&self) -> String {
        self.event.subject()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a durable log payload; the embedded event is re-validated
    pub fn from_slice(bytes: &[u8]) -> ValidationResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

/// Tally of a bulk operation, returned to the caller and never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(error.into());
    }
}
