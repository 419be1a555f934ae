use super::EventSink;
use crate::error::SinkResult;
use crate::records::{ProcessedEventRecord, RevenueTransaction, UserDemographicSnapshot};
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::debug;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Rows per multi-row statement, well under the bind parameter limit
const MAX_ROWS_PER_STATEMENT: usize = 1000;

#[derive(Clone)]
pub struct PgEventSink {
    pool: PgPool,
    ping_timeout: Duration,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ping_timeout: Duration::from_secs(2),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn insert_processed_events(&self, records: &[ProcessedEventRecord]) -> SinkResult<u64> {
        let mut inserted = 0;

        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO processed_events \
                 (event_id, timestamp, source, funnel_stage, event_type, \
                 user_id, raw_data, correlation_id) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.event_id.clone())
                    .push_bind(record.timestamp)
                    .push_bind(record.source.as_str())
                    .push_bind(record.funnel_stage.as_str())
                    .push_bind(record.event_type.clone())
                    .push_bind(record.user_id.clone())
                    .push_bind(record.raw_data.clone())
                    .push_bind(record.correlation_id.clone());
            });
            builder.push(" ON CONFLICT (event_id) DO NOTHING");

            inserted += builder.build().execute(&self.pool).await?.rows_affected();
        }

        debug!(rows = records.len(), inserted, "Processed events written");
        Ok(inserted)
    }

    async fn upsert_demographics(&self, snapshots: &[UserDemographicSnapshot]) -> SinkResult<u64> {
        let mut affected = 0;

        for chunk in snapshots.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO user_demographics \
                 (user_id, source, name, age, gender, country, city, \
                 username, followers, last_event_at) ",
            );
            builder.push_values(chunk, |mut row, snapshot| {
                row.push_bind(snapshot.user_id.clone())
                    .push_bind(snapshot.source.as_str())
                    .push_bind(snapshot.name.clone())
                    .push_bind(snapshot.age)
                    .push_bind(snapshot.gender.clone())
                    .push_bind(snapshot.country.clone())
                    .push_bind(snapshot.city.clone())
                    .push_bind(snapshot.username.clone())
                    .push_bind(snapshot.followers)
                    .push_bind(snapshot.last_event_at);
            });
            // Older redeliveries must not roll a snapshot back
            builder.push(
                " ON CONFLICT (user_id, source) DO UPDATE SET \
                 name = COALESCE(EXCLUDED.name, user_demographics.name), \
                 age = COALESCE(EXCLUDED.age, user_demographics.age), \
                 gender = COALESCE(EXCLUDED.gender, user_demographics.gender), \
                 country = COALESCE(EXCLUDED.country, user_demographics.country), \
                 city = COALESCE(EXCLUDED.city, user_demographics.city), \
                 username = COALESCE(EXCLUDED.username, user_demographics.username), \
                 followers = COALESCE(EXCLUDED.followers, user_demographics.followers), \
                 last_event_at = EXCLUDED.last_event_at, \
                 updated_at = NOW() \
                 WHERE user_demographics.last_event_at <= EXCLUDED.last_event_at",
            );

            affected += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(affected)
    }

    async fn insert_revenue(&self, transactions: &[RevenueTransaction]) -> SinkResult<u64> {
        let mut inserted = 0;

        for chunk in transactions.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO revenue_transactions \
                 (event_id, user_id, source, amount, currency, campaign_id, \
                 event_type, timestamp) ",
            );
            builder.push_values(chunk, |mut row, transaction| {
                row.push_bind(transaction.event_id.clone())
                    .push_bind(transaction.user_id.clone())
                    .push_bind(transaction.source.as_str())
                    .push_bind(transaction.amount)
                    .push_unseparated("::NUMERIC")
                    .push_bind(transaction.currency.clone())
                    .push_bind(transaction.campaign_id.clone())
                    .push_bind(transaction.event_type.clone())
                    .push_bind(transaction.timestamp);
            });
            builder.push(" ON CONFLICT (event_id) DO NOTHING");

            inserted += builder.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(inserted)
    }

    async fn health_check(&self) -> bool {
        db_pool::ping(&self.pool, self.ping_timeout).await
    }
}
