//! Validated webhook event
//!
//! Inbound JSON is first read into a loose wire shape, then converted into an
//! [`Event`] whose engagement is a closed tagged union selected by
//! `(source, eventType)`. Anything that does not fit one of the known shapes
//! is a [`ValidationError`].

use crate::error::{ValidationError, ValidationResult, MAX_EVENT_ID_LEN};
use crate::facebook::{FacebookEngagement, FacebookEventType, FacebookUser};
use crate::tiktok::{TiktokEngagement, TiktokEventType, TiktokUser};
use crate::{subject_for, FunnelStage, Source};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireEvent")]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    /// Stage declared by the sender; used for routing as given
    pub funnel_stage: FunnelStage,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Facebook {
        event_type: FacebookEventType,
        user: FacebookUser,
        engagement: FacebookEngagement,
    },
    Tiktok {
        event_type: TiktokEventType,
        user: TiktokUser,
        engagement: TiktokEngagement,
    },
}

impl Event {
    /// Validate one JSON element (a bulk array entry or a single webhook body)
    pub fn from_value(value: serde_json::Value) -> ValidationResult<Self> {
        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Event::try_from(wire)
    }

    pub fn from_slice(bytes: &[u8]) -> ValidationResult<Self> {
        let wire: WireEvent = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Event::try_from(wire)
    }

    pub fn source(&self) -> Source {
        match self.payload {
            EventPayload::Facebook { .. } => Source::Facebook,
            EventPayload::Tiktok { .. } => Source::Tiktok,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            EventPayload::Facebook { event_type, .. } => event_type.as_str(),
            EventPayload::Tiktok { event_type, .. } => event_type.as_str(),
        }
    }

    pub fn user_id(&self) -> &str {
        match &self.payload {
            EventPayload::Facebook { user, .. } => &user.user_id,
            EventPayload::Tiktok { user, .. } => &user.user_id,
        }
    }

    /// `events.<source>.<funnelStage>`
    pub fn subject(&self) -> String {
        subject_for(self.source(), self.funnel_stage)
    }

    pub fn purchase_amount_raw(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Facebook { engagement, .. } => engagement.purchase_amount(),
            EventPayload::Tiktok { engagement, .. } => engagement.purchase_amount(),
        }
    }

    /// Parsed purchase amount. Validation guarantees the raw value parses.
    pub fn purchase_amount(&self) -> Option<f64> {
        self.purchase_amount_raw()
            .and_then(|raw| parse_purchase_amount(raw).ok())
    }

    /// Campaign attribution; only Facebook bottom-funnel engagements carry one
    pub fn campaign_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Facebook { engagement, .. } => engagement.campaign_id(),
            EventPayload::Tiktok { .. } => None,
        }
    }

    pub fn is_conversion(&self) -> bool {
        match &self.payload {
            EventPayload::Facebook { event_type, .. } => event_type.is_conversion(),
            EventPayload::Tiktok { event_type, .. } => event_type.is_conversion(),
        }
    }

    /// Conversion event type for the source, or any event carrying a purchase amount
    pub fn is_revenue_event(&self) -> bool {
        self.is_conversion() || self.purchase_amount_raw().is_some()
    }

    fn to_wire(&self) -> WireEventRef<'_> {
        let data = match &self.payload {
            EventPayload::Facebook {
                user, engagement, ..
            } => WireDataRef::Facebook { user, engagement },
            EventPayload::Tiktok {
                user, engagement, ..
            } => WireDataRef::Tiktok { user, engagement },
        };

        WireEventRef {
            event_id: &self.event_id,
            timestamp: &self.timestamp,
            source: self.source(),
            funnel_stage: self.funnel_stage,
            event_type: self.event_type(),
            data,
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

pub fn parse_purchase_amount(raw: &str) -> ValidationResult<f64> {
    match raw.trim().parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount >= 0.0 => Ok(amount),
        _ => Err(ValidationError::InvalidPurchaseAmount(raw.to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    event_id: String,
    timestamp: DateTime<Utc>,
    source: Source,
    funnel_stage: FunnelStage,
    event_type: String,
    data: WireData,
}

#[derive(Debug, Deserialize)]
struct WireData {
    user: serde_json::Value,
    engagement: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEventRef<'a> {
    event_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    source: Source,
    funnel_stage: FunnelStage,
    event_type: &'static str,
    data: WireDataRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireDataRef<'a> {
    Facebook {
        user: &'a FacebookUser,
        engagement: &'a FacebookEngagement,
    },
    Tiktok {
        user: &'a TiktokUser,
        engagement: &'a TiktokEngagement,
    },
}

impl TryFrom<WireEvent> for Event {
    type Error = ValidationError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        if wire.event_id.trim().is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        if wire.event_id.len() > MAX_EVENT_ID_LEN {
            return Err(ValidationError::EventIdTooLong);
        }

        let payload = match wire.source {
            Source::Facebook => {
                let event_type = FacebookEventType::parse(&wire.event_type).ok_or_else(|| {
                    ValidationError::UnknownEventType {
                        platform: Source::Facebook,
                        event_type: wire.event_type.clone(),
                    }
                })?;
                let user: FacebookUser = parse_user(Source::Facebook, wire.data.user)?;
                let stage = event_type.natural_stage();
                let engagement = FacebookEngagement::from_value(stage, wire.data.engagement)
                    .map_err(|e| invalid_engagement(Source::Facebook, stage, &wire.event_type, e))?;
                EventPayload::Facebook {
                    event_type,
                    user,
                    engagement,
                }
            }
            Source::Tiktok => {
                let event_type = TiktokEventType::parse(&wire.event_type).ok_or_else(|| {
                    ValidationError::UnknownEventType {
                        platform: Source::Tiktok,
                        event_type: wire.event_type.clone(),
                    }
                })?;
                let user: TiktokUser = parse_user(Source::Tiktok, wire.data.user)?;
                let stage = event_type.natural_stage();
                let engagement = TiktokEngagement::from_value(stage, wire.data.engagement)
                    .map_err(|e| invalid_engagement(Source::Tiktok, stage, &wire.event_type, e))?;
                EventPayload::Tiktok {
                    event_type,
                    user,
                    engagement,
                }
            }
        };

        let event = Event {
            event_id: wire.event_id,
            timestamp: wire.timestamp,
            funnel_stage: wire.funnel_stage,
            payload,
        };

        if event.user_id().trim().is_empty() {
            return Err(ValidationError::InvalidUser {
                platform: event.source(),
                reason: "userId must not be empty".to_string(),
            });
        }
        if let Some(raw) = event.purchase_amount_raw() {
            parse_purchase_amount(raw)?;
        }

        Ok(event)
    }
}

fn parse_user<T: serde::de::DeserializeOwned>(
    platform: Source,
    value: serde_json::Value,
) -> ValidationResult<T> {
    serde_json::from_value(value).map_err(|e| ValidationError::InvalidUser {
        platform,
        reason: e.to_string(),
    })
}

fn invalid_engagement(
    platform: Source,
    stage: FunnelStage,
    event_type: &str,
    err: serde_json::Error,
) -> ValidationError {
    ValidationError::InvalidEngagement {
        platform,
        stage,
        event_type: event_type.to_string(),
        reason: err.to_string(),
    }
}
