use actix_middleware::{CorrelationIdMiddleware, HttpMetrics, RequestLogging};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use event_log::{KafkaEventLog, KafkaLogConfig};
use ingest_gateway::batcher::{BatcherSettings, IngressBatcher};
use ingest_gateway::publisher::{DurablePublisher, PublisherSettings};
use ingest_gateway::{configure, json_config, AppState, GatewayConfig};
use pipeline_metrics::PrometheusPipelineMetrics;
use prometheus::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ingest_gateway=debug,actix_web=info".into());

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

    let config = GatewayConfig::from_env().context("Failed to load gateway configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid gateway configuration")?;

    info!(
        port = config.http_port,
        brokers = %config.kafka_brokers,
        batch_size = config.batch_size,
        "Starting ingest-gateway"
    );

    let registry = Registry::new();
    let pipeline_metrics = Arc::new(
        PrometheusPipelineMetrics::new(&registry, "ingest-gateway")
            .context("Failed to create pipeline metrics")?,
    );
    let http_metrics = HttpMetrics::new(&registry).context("Failed to create HTTP metrics")?;

    let log = Arc::new(
        KafkaEventLog::new(KafkaLogConfig {
            brokers: config.kafka_brokers.clone(),
            client_id: "ingest-gateway".to_string(),
            ..Default::default()
        })
        .context("Failed to create Kafka producer")?,
    );

    let publisher = Arc::new(DurablePublisher::new(
        log.clone(),
        pipeline_metrics.clone(),
        PublisherSettings {
            publish_timeout: config.publish_timeout(),
            retry: config.retry_config(),
            chunk_size: config.publish_chunk_size,
            inter_batch_delay: Duration::from_millis(config.publish_delay_ms),
        },
    ));
    let batcher = IngressBatcher::new(
        publisher,
        pipeline_metrics,
        BatcherSettings {
            batch_size: config.batch_size,
            inter_batch_delay: Duration::from_millis(config.batch_delay_ms),
            max_bulk_events: config.max_bulk_events,
        },
    );

    let state = web::Data::new(AppState {
        batcher,
        log,
        registry,
        started_at: Instant::now(),
    });
    let json_limit = config.json_limit_bytes;

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(json_config(json_limit))
            .wrap(http_metrics.clone())
            .wrap(RequestLogging)
            .wrap(CorrelationIdMiddleware)
            .configure(configure)
    })
    .bind((config.http_host.as_str(), config.http_port))
    .with_context(|| format!("Failed to bind port {}", config.http_port))?
    .run()
    .await
    .context("HTTP server error")
}
