use actix_middleware::{CorrelationIdMiddleware, HttpMetrics, RequestLogging};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use db_pool::{create_pool, DbConfig, PoolMetrics};
use event_collector::runtime::{join_consumers, spawn_consumers, ConsumerLiveness};
use event_collector::sink::PgEventSink;
use event_collector::{
    configure, AppState, CollectorConfig, EventMaterializer, MaterializingHandler,
};
use event_log::KafkaEventLog;
use pipeline_metrics::PrometheusPipelineMetrics;
use prometheus::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,event_collector=debug,idempotent_consumer=debug".into());

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

    let config = CollectorConfig::from_env().context("Failed to load collector configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid collector configuration")?;
    let plans = config.consumer_plans().map_err(anyhow::Error::msg)?;

    info!(
        port = config.http_port,
        brokers = %config.kafka_brokers,
        sources = %config.sources,
        max_deliver = config.max_deliver,
        "Starting event-collector"
    );

    let registry = Registry::new();

    // Database
    let db_config = DbConfig::for_service("event-collector");
    db_config.log_config();
    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let pool_metrics =
        PoolMetrics::new(&registry, "event-collector").context("Failed to create pool metrics")?;
    pool_metrics.spawn_updater(pool.clone(), Duration::from_secs(15));

    let sink = Arc::new(PgEventSink::new(pool));
    if config.run_migrations {
        sink.migrate().await.context("Failed to run migrations")?;
        info!("Sink migrations applied");
    }

    // Broker
    let log = Arc::new(
        KafkaEventLog::new(config.kafka_config()).context("Failed to create Kafka client")?,
    );

    let pipeline_metrics = Arc::new(
        PrometheusPipelineMetrics::new(&registry, "event-collector")
            .context("Failed to create pipeline metrics")?,
    );
    let http_metrics = HttpMetrics::new(&registry).context("Failed to create HTTP metrics")?;

    let materializer = Arc::new(EventMaterializer::new(sink.clone()));
    let handler = Arc::new(MaterializingHandler::new(materializer));

    let consumers = Arc::new(ConsumerLiveness::new(&plans));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = spawn_consumers(
        log.clone(),
        handler,
        pipeline_metrics,
        plans,
        config.consumer_settings(),
        consumers.clone(),
        shutdown_rx,
    );

    let state = web::Data::new(AppState {
        log,
        sink,
        consumers: consumers.clone(),
        registry,
        started_at: Instant::now(),
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(http_metrics.clone())
            .wrap(RequestLogging)
            .wrap(CorrelationIdMiddleware)
            .configure(configure)
    })
    .disable_signals()
    .bind((config.http_host.as_str(), config.http_port))
    .with_context(|| format!("Failed to bind port {}", config.http_port))?
    .run();
    let server_handle = server.handle();

    let mut stopped = Vec::new();
    tokio::select! {
        result = server => result.context("HTTP server error")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, draining consumers");
            server_handle.stop(true).await;
        }
        sources = consumers.wait_for_stop() => {
            error!(?sources, "Stream consumer stopped unexpectedly, shutting down");
            server_handle.stop(true).await;
            stopped = sources;
        }
    }

    // In-flight messages finish before the tasks return
    let _ = shutdown_tx.send(true);
    let stats = join_consumers(tasks).await;

    info!(
        acked = stats.acked,
        redelivered = stats.redelivered,
        terminated = stats.terminated,
        "event-collector stopped"
    );

    if !stopped.is_empty() {
        let sources: Vec<&str> = stopped.iter().map(|s| s.as_str()).collect();
        anyhow::bail!("Stream consumer stopped early: {}", sources.join(","));
    }
    Ok(())
}
