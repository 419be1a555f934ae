//! Validation errors for inbound webhook events

use crate::{FunnelStage, Source};
use thiserror::Error;

/// Maximum accepted length of an `eventId`
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Reasons an inbound event is rejected before it reaches the durable log
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Top-level shape did not deserialize (missing field, wrong type, bad enum value)
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("eventId must not be empty")]
    EmptyEventId,

    #[error("eventId exceeds {} characters", MAX_EVENT_ID_LEN)]
    EventIdTooLong,

    #[error("unknown eventType '{event_type}' for source {platform}")]
    UnknownEventType { platform: Source, event_type: String },

    #[error("invalid {platform} user: {reason}")]
    InvalidUser { platform: Source, reason: String },

    #[error("invalid {stage}-funnel engagement for {platform} '{event_type}': {reason}")]
    InvalidEngagement {
        platform: Source,
        stage: FunnelStage,
        event_type: String,
        reason: String,
    },

    #[error("invalid purchaseAmount '{0}'")]
    InvalidPurchaseAmount(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;
