use actix_middleware::{CorrelationIdMiddleware, HttpMetrics, RequestLogging};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use db_pool::{create_pool, DbConfig, PoolMetrics};
use prometheus::Registry;
use reporting_service::{configure, AppState, ReportRepository, ReporterConfig};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,reporting_service=debug".into());

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ReporterConfig::from_env().context("Failed to load reporter configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid reporter configuration")?;

    info!(port = config.http_port, "Starting reporting-service");

    let registry = Registry::new();

    let db_config = DbConfig::for_service("reporting-service");
    db_config.log_config();
    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let pool_metrics = PoolMetrics::new(&registry, "reporting-service")
        .context("Failed to create pool metrics")?;
    pool_metrics.spawn_updater(pool.clone(), Duration::from_secs(15));

    let http_metrics = HttpMetrics::new(&registry).context("Failed to create HTTP metrics")?;

    let state = web::Data::new(AppState {
        reports: ReportRepository::new(pool, config.top_locations),
        query_timeout: config.query_timeout(),
        registry,
        started_at: Instant::now(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(http_metrics.clone())
            .wrap(RequestLogging)
            .wrap(CorrelationIdMiddleware)
            .configure(configure)
    })
    .bind((config.http_host.as_str(), config.http_port))
    .with_context(|| format!("Failed to bind port {}", config.http_port))?
    .run()
    .await
    .context("HTTP server error")?;

    info!("reporting-service stopped");
    Ok(())
}
