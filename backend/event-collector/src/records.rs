//! Rows derived from one event
//!
//! | Record                    | Key                 | Write                      |
//! |---------------------------|---------------------|----------------------------|
//! | `ProcessedEventRecord`    | `event_id`          | insert, duplicate skipped  |
//! | `UserDemographicSnapshot` | `(user_id, source)` | upsert, newest event wins  |
//! | `RevenueTransaction`      | `event_id`          | insert, duplicate skipped  |

use crate::error::{SinkError, SinkResult};
use chrono::{DateTime, Utc};
use event_schema::tiktok::TiktokEngagement;
use event_schema::{Event, EventPayload, FunnelStage, Source};
use serde_json::Value;
use std::collections::HashMap;

pub const REVENUE_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEventRecord {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub funnel_stage: FunnelStage,
    pub event_type: String,
    pub user_id: String,
    pub raw_data: Value,
    pub correlation_id: String,
}

/// Latest known profile of a user on one source
///
/// Facebook fills name/age/gender/location, TikTok fills
/// username/followers and, from top-funnel views, country.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDemographicSnapshot {
    pub user_id: String,
    pub source: Source,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub username: Option<String>,
    pub followers: Option<i64>,
    pub last_event_at: DateTime<Utc>,
}

impl UserDemographicSnapshot {
    pub fn key(&self) -> (String, Source) {
        (self.user_id.clone(), self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueTransaction {
    pub event_id: String,
    pub user_id: String,
    pub source: Source,
    pub amount: f64,
    pub currency: String,
    pub campaign_id: Option<String>,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything one event writes to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecords {
    pub processed: ProcessedEventRecord,
    pub demographic: UserDemographicSnapshot,
    pub revenue: Option<RevenueTransaction>,
}

impl DerivedRecords {
    pub fn from_event(event: &Event, correlation_id: &str) -> SinkResult<Self> {
        let raw_data = serde_json::to_value(event).map_err(|source| SinkError::Encode {
            event_id: event.event_id.clone(),
            source,
        })?;

        let processed = ProcessedEventRecord {
            event_id: event.event_id.clone(),
            timestamp: event.timestamp,
            source: event.source(),
            funnel_stage: event.funnel_stage,
            event_type: event.event_type().to_string(),
            user_id: event.user_id().to_string(),
            raw_data,
            correlation_id: correlation_id.to_string(),
        };

        Ok(Self {
            processed,
            demographic: demographic_snapshot(event),
            revenue: revenue_transaction(event),
        })
    }
}

fn demographic_snapshot(event: &Event) -> UserDemographicSnapshot {
    match &event.payload {
        EventPayload::Facebook { user, .. } => UserDemographicSnapshot {
            user_id: user.user_id.clone(),
            source: Source::Facebook,
            name: Some(user.name.clone()),
            age: i32::try_from(user.age).ok(),
            gender: Some(user.gender.as_str().to_string()),
            country: Some(user.location.country.clone()),
            city: Some(user.location.city.clone()),
            username: None,
            followers: None,
            last_event_at: event.timestamp,
        },
        EventPayload::Tiktok {
            user, engagement, ..
        } => UserDemographicSnapshot {
            user_id: user.user_id.clone(),
            source: Source::Tiktok,
            name: None,
            age: None,
            gender: None,
            country: match engagement {
                TiktokEngagement::Top(top) => Some(top.country.clone()),
                TiktokEngagement::Bottom(_) => None,
            },
            city: None,
            username: Some(user.username.clone()),
            followers: i64::try_from(user.followers).ok(),
            last_event_at: event.timestamp,
        },
    }
}

/// Revenue row when the event qualifies and carries an amount
fn revenue_transaction(event: &Event) -> Option<RevenueTransaction> {
    if !event.is_revenue_event() {
        return None;
    }
    let amount = event.purchase_amount()?;

    Some(RevenueTransaction {
        event_id: event.event_id.clone(),
        user_id: event.user_id().to_string(),
        source: event.source(),
        amount,
        currency: REVENUE_CURRENCY.to_string(),
        campaign_id: event.campaign_id().map(str::to_string),
        event_type: event.event_type().to_string(),
        timestamp: event.timestamp,
    })
}

/// Keep one snapshot per `(user_id, source)`, the one with the newest event
///
/// A single upsert statement may not touch the same key twice.
pub fn collapse_snapshots(snapshots: Vec<UserDemographicSnapshot>) -> Vec<UserDemographicSnapshot> {
    let mut latest: HashMap<(String, Source), UserDemographicSnapshot> = HashMap::new();
    let mut order = Vec::new();

    for snapshot in snapshots {
        let key = snapshot.key();
        match latest.get(&key) {
            Some(current) if current.last_event_at > snapshot.last_event_at => {}
            Some(_) => {
                latest.insert(key, snapshot);
            }
            None => {
                order.push(key.clone());
                latest.insert(key, snapshot);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| latest.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::testing;

    #[test]
    fn test_facebook_purchase_derives_revenue_with_campaign() {
        let event = testing::facebook_purchase("fb-1", "49.90");
        let records = DerivedRecords::from_event(&event, "corr-1").unwrap();

        assert_eq!(records.processed.event_type, "checkout.complete");
        assert_eq!(records.processed.correlation_id, "corr-1");
        assert_eq!(records.processed.raw_data["eventId"], "fb-1");

        let revenue = records.revenue.unwrap();
        assert_eq!(revenue.amount, 49.90);
        assert_eq!(revenue.currency, "USD");
        assert_eq!(revenue.campaign_id.as_deref(), Some("campaign-7"));
    }

    #[test]
    fn test_tiktok_purchase_has_no_campaign() {
        let event = testing::tiktok_purchase("tt-1", Some("12.50"));
        let records = DerivedRecords::from_event(&event, "corr-1").unwrap();

        let revenue = records.revenue.unwrap();
        assert_eq!(revenue.source, Source::Tiktok);
        assert_eq!(revenue.campaign_id, None);
        assert_eq!(records.demographic.country, None);
        assert!(records.demographic.username.is_some());
    }

    #[test]
    fn test_conversion_without_amount_has_no_revenue() {
        let event = testing::tiktok_purchase("tt-1", None);
        let records = DerivedRecords::from_event(&event, "corr-1").unwrap();
        assert!(records.revenue.is_none());

        let records = DerivedRecords::from_event(&testing::facebook_top("fb-1"), "c").unwrap();
        assert!(records.revenue.is_none());
        assert_eq!(records.demographic.age, Some(29));
    }

    #[test]
    fn test_collapse_snapshots_keeps_newest() {
        let older = testing::facebook_user_event("e1", "u1", 30, "2025-01-15T10:00:00Z");
        let newer = testing::facebook_user_event("e2", "u1", 31, "2025-01-15T11:00:00Z");
        let other = testing::facebook_user_event("e3", "u2", 40, "2025-01-15T09:00:00Z");

        let snapshots = [&newer, &other, &older]
            .iter()
            .map(|e| demographic_snapshot(e))
            .collect();
        let collapsed = collapse_snapshots(snapshots);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].user_id, "u1");
        assert_eq!(collapsed[0].age, Some(31));
        assert_eq!(collapsed[1].user_id, "u2");
    }
}
