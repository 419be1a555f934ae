//! Report query parameters
//!
//! Raw query strings are accepted as-is and validated here so that a bad
//! timestamp or an unknown enum value becomes a 400 with a readable message.

use chrono::{DateTime, Duration, Utc};
use event_schema::{FunnelStage, Source};
use serde::{Deserialize, Serialize};

/// Window reported when the request leaves `from` or `to` open
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Query string of every `/reports/*` endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub source: Option<String>,
    pub funnel_stage: Option<String>,
    pub event_type: Option<String>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilters {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub source: Option<Source>,
    pub funnel_stage: Option<FunnelStage>,
    pub event_type: Option<String>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_time(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    non_empty(value)
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| format!("{} must be an RFC 3339 timestamp, got '{}'", field, raw))
        })
        .transpose()
}

impl TryFrom<ReportQuery> for ReportFilters {
    type Error = String;

    fn try_from(query: ReportQuery) -> Result<Self, Self::Error> {
        let from = parse_time("from", query.from)?;
        let to = parse_time("to", query.to)?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err("from must not be later than to".to_string());
            }
        }

        let source = non_empty(query.source)
            .map(|s| s.parse::<Source>())
            .transpose()?;
        let funnel_stage = non_empty(query.funnel_stage)
            .map(|s| s.parse::<FunnelStage>())
            .transpose()?;

        Ok(Self {
            from,
            to,
            source,
            funnel_stage,
            event_type: non_empty(query.event_type),
            campaign_id: non_empty(query.campaign_id),
        })
    }
}

impl ReportFilters {
    /// Reported window; open ends fall back to the last 24 hours before `now`
    pub fn time_range(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange {
            from: self
                .from
                .unwrap_or_else(|| now - Duration::hours(DEFAULT_WINDOW_HOURS)),
            to: self.to.unwrap_or(now),
        }
    }

    /// Whether a per-platform section belongs in the response
    pub fn includes(&self, source: Source) -> bool {
        self.source.map_or(true, |s| s == source)
    }
}
