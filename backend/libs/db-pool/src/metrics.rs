//! Prometheus gauges for the connection pool
//!
//! Registered on the service's own registry so `/metrics` exposes pool state
//! next to the pipeline counters.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use sqlx::PgPool;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PoolMetrics {
    service: String,
    connections: IntGaugeVec,
    errors: IntCounterVec,
}

impl PoolMetrics {
    pub fn new(registry: &Registry, service: &str) -> Result<Self, prometheus::Error> {
        let connections = IntGaugeVec::new(
            Opts::new("db_pool_connections", "Database pool connection count by state"),
            &["service", "state"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "db_pool_connection_errors_total",
                "Connection acquisition errors",
            ),
            &["service", "error_type"],
        )?;

        for metric in [
            Box::new(connections.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(errors.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register pool metric: {}", e);
            }
        }

        Ok(Self {
            service: service.to_string(),
            connections,
            errors,
        })
    }

    /// Snapshot idle/active/max connection counts
    pub fn update(&self, pool: &PgPool) {
        let size = pool.size() as i64;
        let idle = pool.num_idle() as i64;

        self.connections
            .with_label_values(&[self.service.as_str(), "idle"])
            .set(idle);
        self.connections
            .with_label_values(&[self.service.as_str(), "active"])
            .set(size - idle);
        self.connections
            .with_label_values(&[self.service.as_str(), "max"])
            .set(pool.options().get_max_connections() as i64);
    }

    /// Count a failed acquisition by kind
    pub fn record_error(&self, error: &sqlx::Error) {
        let error_type = match error {
            sqlx::Error::PoolTimedOut => "timeout",
            sqlx::Error::PoolClosed => "closed",
            _ => "other",
        };
        self.errors
            .with_label_values(&[self.service.as_str(), error_type])
            .inc();
    }

    /// Refresh the gauges on a fixed interval until the pool closes
    pub fn spawn_updater(self, pool: PgPool, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            while !pool.is_closed() {
                interval.tick().await;
                self.update(&pool);
            }
        })
    }
}
