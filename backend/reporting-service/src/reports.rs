//! Aggregate queries over the collector's tables
//!
//! Every report runs its independent aggregates concurrently on the pool.
//! Optional filters are appended with [`QueryBuilder`] so each value is bound,
//! never interpolated.

use crate::buckets::{AGE_GROUPS, FOLLOWER_RANGES};
use crate::filters::{ReportFilters, TimeRange};
use event_schema::Source;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;

pub type Counts = BTreeMap<String, i64>;
pub type Amounts = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: i64,
    pub events_by_source: Counts,
    pub events_by_funnel_stage: Counts,
    pub events_by_type: Counts,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueData {
    pub total_revenue: f64,
    pub revenue_by_source: Amounts,
    /// Transactions without a campaign are reported under `unknown`
    pub revenue_by_campaign: Amounts,
    pub transaction_count: i64,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCount {
    pub location: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryCount {
    pub country: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookDemographics {
    pub age_groups: Counts,
    pub gender_distribution: Counts,
    pub top_locations: Vec<LocationCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokDemographics {
    pub follower_ranges: Counts,
    pub top_countries: Vec<CountryCount>,
}

/// A platform excluded by the `source` filter is `null`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemographicsData {
    pub facebook: Option<FacebookDemographics>,
    pub tiktok: Option<TiktokDemographics>,
    pub time_range: TimeRange,
}

type Query = QueryBuilder<'static, Postgres>;

fn push_time_bounds(qb: &mut Query, column: &str, filters: &ReportFilters) {
    if let Some(from) = filters.from {
        qb.push(format!(" AND {} >= ", column)).push_bind(from);
    }
    if let Some(to) = filters.to {
        qb.push(format!(" AND {} <= ", column)).push_bind(to);
    }
}

fn events_query(select: &str, filters: &ReportFilters) -> Query {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM processed_events WHERE TRUE");
    push_time_bounds(&mut qb, "timestamp", filters);
    if let Some(source) = filters.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(stage) = filters.funnel_stage {
        qb.push(" AND funnel_stage = ").push_bind(stage.as_str());
    }
    if let Some(event_type) = &filters.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.clone());
    }
    qb
}

fn revenue_query(select: &str, filters: &ReportFilters) -> Query {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM revenue_transactions WHERE TRUE");
    push_time_bounds(&mut qb, "timestamp", filters);
    if let Some(source) = filters.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(campaign_id) = &filters.campaign_id {
        qb.push(" AND campaign_id = ").push_bind(campaign_id.clone());
    }
    qb
}

/// Demographic rows of one platform, windowed on first sighting
fn demographics_query(select: &str, source: Source, filters: &ReportFilters) -> Query {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM user_demographics WHERE source = ")
        .push_bind(source.as_str());
    push_time_bounds(&mut qb, "created_at", filters);
    qb
}

async fn count(pool: &PgPool, mut qb: Query) -> Result<i64, sqlx::Error> {
    qb.build_query_scalar().fetch_one(pool).await
}

/// `qb` selects `(key, COUNT(*))`; grouping on the first column is appended
async fn grouped_counts(pool: &PgPool, mut qb: Query) -> Result<Counts, sqlx::Error> {
    qb.push(" GROUP BY 1");
    let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

async fn grouped_amounts(pool: &PgPool, mut qb: Query) -> Result<Amounts, sqlx::Error> {
    qb.push(" GROUP BY 1");
    let rows: Vec<(String, f64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

#[derive(Clone)]
pub struct ReportRepository {
    pool: PgPool,
    top_n: i64,
}

impl ReportRepository {
    pub fn new(pool: PgPool, top_n: i64) -> Self {
        Self { pool, top_n }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn event_stats(
        &self,
        filters: &ReportFilters,
        time_range: TimeRange,
    ) -> Result<EventStats, sqlx::Error> {
        let pool = &self.pool;
        let (total_events, events_by_source, events_by_funnel_stage, events_by_type) =
            futures::try_join!(
                count(pool, events_query("SELECT COUNT(*)", filters)),
                grouped_counts(pool, events_query("SELECT source, COUNT(*)", filters)),
                grouped_counts(pool, events_query("SELECT funnel_stage, COUNT(*)", filters)),
                grouped_counts(pool, events_query("SELECT event_type, COUNT(*)", filters)),
            )?;

        Ok(EventStats {
            total_events,
            events_by_source,
            events_by_funnel_stage,
            events_by_type,
            time_range,
        })
    }

    pub async fn revenue(
        &self,
        filters: &ReportFilters,
        time_range: TimeRange,
    ) -> Result<RevenueData, sqlx::Error> {
        let pool = &self.pool;
        let total = async {
            let mut qb =
                revenue_query("SELECT COALESCE(SUM(amount), 0)::FLOAT8, COUNT(*)", filters);
            qb.build_query_as::<(f64, i64)>().fetch_one(pool).await
        };
        let ((total_revenue, transaction_count), revenue_by_source, revenue_by_campaign) =
            futures::try_join!(
                total,
                grouped_amounts(
                    pool,
                    revenue_query("SELECT source, COALESCE(SUM(amount), 0)::FLOAT8", filters)
                ),
                grouped_amounts(
                    pool,
                    revenue_query(
                        "SELECT COALESCE(campaign_id, 'unknown'), COALESCE(SUM(amount), 0)::FLOAT8",
                        filters
                    )
                ),
            )?;

        Ok(RevenueData {
            total_revenue,
            revenue_by_source,
            revenue_by_campaign,
            transaction_count,
            time_range,
        })
    }

    pub async fn demographics(
        &self,
        filters: &ReportFilters,
        time_range: TimeRange,
    ) -> Result<DemographicsData, sqlx::Error> {
        let facebook = async {
            if filters.includes(Source::Facebook) {
                self.facebook_demographics(filters).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let tiktok = async {
            if filters.includes(Source::Tiktok) {
                self.tiktok_demographics(filters).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let (facebook, tiktok) = futures::try_join!(facebook, tiktok)?;

        Ok(DemographicsData {
            facebook,
            tiktok,
            time_range,
        })
    }

    async fn facebook_demographics(
        &self,
        filters: &ReportFilters,
    ) -> Result<FacebookDemographics, sqlx::Error> {
        let pool = &self.pool;
        let source = Source::Facebook;
        let age_select = format!("SELECT {}, COUNT(*)", AGE_GROUPS.sql_case("age"));

        let locations = async {
            let mut qb = demographics_query(
                "SELECT COALESCE(city, 'unknown'), COALESCE(country, 'unknown'), COUNT(*)",
                source,
                filters,
            );
            qb.push(" GROUP BY 1, 2 ORDER BY 3 DESC, 1, 2 LIMIT ")
                .push_bind(self.top_n);
            let rows: Vec<(String, String, i64)> = qb.build_query_as().fetch_all(pool).await?;
            Ok::<_, sqlx::Error>(
                rows.into_iter()
                    .map(|(city, country, count)| LocationCount {
                        location: format!("{}, {}", city, country),
                        count,
                    })
                    .collect::<Vec<_>>(),
            )
        };

        let (age_groups, gender_distribution, top_locations) = futures::try_join!(
            grouped_counts(pool, demographics_query(&age_select, source, filters)),
            grouped_counts(
                pool,
                demographics_query("SELECT COALESCE(gender, 'unknown'), COUNT(*)", source, filters)
            ),
            locations,
        )?;

        Ok(FacebookDemographics {
            age_groups,
            gender_distribution,
            top_locations,
        })
    }

    async fn tiktok_demographics(
        &self,
        filters: &ReportFilters,
    ) -> Result<TiktokDemographics, sqlx::Error> {
        let pool = &self.pool;
        let source = Source::Tiktok;
        let follower_select = format!("SELECT {}, COUNT(*)", FOLLOWER_RANGES.sql_case("followers"));

        let countries = async {
            let mut qb = demographics_query(
                "SELECT COALESCE(country, 'unknown'), COUNT(*)",
                source,
                filters,
            );
            qb.push(" GROUP BY 1 ORDER BY 2 DESC, 1 LIMIT ")
                .push_bind(self.top_n);
            let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(pool).await?;
            Ok::<_, sqlx::Error>(
                rows.into_iter()
                    .map(|(country, count)| CountryCount { country, count })
                    .collect::<Vec<_>>(),
            )
        };

        let (follower_ranges, top_countries) = futures::try_join!(
            grouped_counts(pool, demographics_query(&follower_select, source, filters)),
            countries,
        )?;

        Ok(TiktokDemographics {
            follower_ranges,
            top_countries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use event_schema::FunnelStage;

    fn filters() -> ReportFilters {
        ReportFilters {
            from: Some(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()),
            source: Some(Source::Facebook),
            funnel_stage: Some(FunnelStage::Bottom),
            event_type: Some("purchase".into()),
            campaign_id: Some("cmp-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_events_query_binds_each_filter() {
        let qb = events_query("SELECT COUNT(*)", &filters());
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM processed_events WHERE TRUE AND timestamp >= $1 \
             AND source = $2 AND funnel_stage = $3 AND event_type = $4"
        );
    }

    #[test]
    fn test_revenue_query_ignores_event_filters() {
        let qb = revenue_query("SELECT COUNT(*)", &filters());
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM revenue_transactions WHERE TRUE AND timestamp >= $1 \
             AND source = $2 AND campaign_id = $3"
        );
    }

    #[test]
    fn test_demographics_query_windows_on_created_at() {
        let qb = demographics_query("SELECT COUNT(*)", Source::Tiktok, &filters());
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM user_demographics WHERE source = $1 AND created_at >= $2"
        );
    }

    #[test]
    fn test_unfiltered_query_has_no_binds() {
        let qb = events_query("SELECT COUNT(*)", &ReportFilters::default());
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM processed_events WHERE TRUE");
    }
}
