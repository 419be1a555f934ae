use actix_middleware::{CorrelationIdMiddleware, CORRELATION_ID_HEADER};
use actix_web::{http::StatusCode, test, web, App};
use event_log::{InMemoryEventLog, StreamConfig};
use event_schema::{testing, FunnelStage, Source};
use ingest_gateway::batcher::{BatcherSettings, IngressBatcher};
use ingest_gateway::handlers::{BulkResponse, WebhookResponse};
use ingest_gateway::health::HealthResponse;
use ingest_gateway::publisher::{DurablePublisher, PublisherSettings};
use ingest_gateway::{configure, json_config, AppState};
use pipeline_metrics::AtomicPipelineMetrics;
use prometheus::Registry;
use resilience::RetryConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn source_log() -> InMemoryEventLog {
    InMemoryEventLog::with_streams(Source::ALL.iter().map(|s| StreamConfig::for_source(*s))).await
}

fn app_state(
    log: &InMemoryEventLog,
    metrics: Arc<AtomicPipelineMetrics>,
    max_bulk_events: usize,
) -> web::Data<AppState> {
    let log: Arc<dyn event_log::DurableLog> = Arc::new(log.clone());
    let publisher = Arc::new(DurablePublisher::new(
        log.clone(),
        metrics.clone(),
        PublisherSettings {
            retry: RetryConfig {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                jitter: false,
                ..Default::default()
            },
            inter_batch_delay: Duration::ZERO,
            ..Default::default()
        },
    ));
    let batcher = IngressBatcher::new(
        publisher,
        metrics,
        BatcherSettings {
            inter_batch_delay: Duration::ZERO,
            max_bulk_events,
            ..Default::default()
        },
    );

    web::Data::new(AppState {
        batcher,
        log,
        registry: Registry::new(),
        started_at: Instant::now(),
    })
}

macro_rules! gateway_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .app_data(json_config(64 * 1024 * 1024))
                .wrap(CorrelationIdMiddleware)
                .configure(configure),
        )
        .await
    };
}

fn facebook_batch(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| testing::facebook_top_json(&format!("fb-{}", i)))
        .collect()
}

#[actix_web::test]
async fn test_bulk_of_valid_events_is_fully_processed() {
    let log = source_log().await;
    let metrics = Arc::new(AtomicPipelineMetrics::new());
    let state = app_state(&log, metrics.clone(), 50_000);
    let app = gateway_app!(state);

    let req = test::TestRequest::post()
        .uri("/webhook/events/bulk")
        .set_json(json!({ "events": facebook_batch(1000) }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], 1000);
    assert_eq!(body["failed"], 0);
    assert!(body.get("errors").is_none());

    assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 1000);
    assert_eq!(
        metrics.snapshot(Source::Facebook, FunnelStage::Top).processed,
        1000
    );
}

#[actix_web::test]
async fn test_one_malformed_element_does_not_block_the_rest() {
    let log = source_log().await;
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 50_000);
    let app = gateway_app!(state);

    let mut events = facebook_batch(999);
    events.insert(500, json!({ "eventId": "broken", "source": "facebook" }));

    let req = test::TestRequest::post()
        .uri("/webhook/events/bulk")
        .set_json(json!({ "events": events }))
        .to_request();
    let body: BulkResponse = test::call_and_read_body_json(&app, req).await;

    assert!(!body.success);
    assert_eq!(body.processed, 999);
    assert_eq!(body.failed, 1);
    assert_eq!(body.errors.len(), 1);
    assert!(body.errors[0].starts_with("event[500] (broken): "));
    assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 999);
}

#[actix_web::test]
async fn test_mixed_sources_land_in_their_own_streams() {
    let log = source_log().await;
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 50_000);
    let app = gateway_app!(state);

    let events = vec![
        testing::facebook_top_json("fb-1"),
        testing::tiktok_top_json("tt-1"),
        testing::tiktok_purchase_json("tt-2", Some("19.99")),
    ];
    let req = test::TestRequest::post()
        .uri("/webhook/events/bulk")
        .set_json(json!({ "events": events }))
        .to_request();
    let body: BulkResponse = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body.processed, 3);
    assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 1);
    assert_eq!(log.stream_len("TIKTOK_EVENTS").await, 2);
}

#[actix_web::test]
async fn test_bulk_over_limit_is_rejected_whole() {
    let log = source_log().await;
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 5);
    let app = gateway_app!(state);

    let req = test::TestRequest::post()
        .uri("/webhook/events/bulk")
        .set_json(json!({ "events": facebook_batch(6) }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: BulkResponse = test::read_body_json(resp).await;
    assert!(!body.success);
    assert_eq!(body.processed, 0);
    assert_eq!(body.failed, 6);
    assert_eq!(log.stream_len("FACEBOOK_EVENTS").await, 0);
}

#[actix_web::test]
async fn test_malformed_json_is_the_only_400() {
    let log = source_log().await;
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 50_000);
    let app = gateway_app!(state);

    for uri in ["/webhook/events", "/webhook/events/bulk"] {
        let req = test::TestRequest::post()
            .uri(uri)
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"events\": [")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: WebhookResponse = test::read_body_json(resp).await;
        assert!(!body.success);
    }
}

#[actix_web::test]
async fn test_single_event_echoes_correlation_id() {
    let log = source_log().await;
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 50_000);
    let app = gateway_app!(state);

    let req = test::TestRequest::post()
        .uri("/webhook/events")
        .insert_header((CORRELATION_ID_HEADER, "corr-abc"))
        .set_json(testing::facebook_bottom_json("fb-9", "checkout.complete", Some("42.00")))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(CORRELATION_ID_HEADER).unwrap(),
        "corr-abc"
    );
    let body: WebhookResponse = test::read_body_json(resp).await;
    assert!(body.success);
    assert_eq!(body.message, "Event processed successfully");

    let payloads = log.stored_payloads("FACEBOOK_EVENTS").await;
    let envelope = event_schema::PublishEnvelope::from_slice(&payloads[0]).unwrap();
    assert_eq!(envelope.correlation_id, "corr-abc");
}

#[actix_web::test]
async fn test_invalid_single_event_is_reported_with_200() {
    let log = source_log().await;
    let metrics = Arc::new(AtomicPipelineMetrics::new());
    let state = app_state(&log, metrics.clone(), 50_000);
    let app = gateway_app!(state);

    let mut event = testing::tiktok_top_json("tt-1");
    event["eventType"] = json!("checkout.complete");

    let req = test::TestRequest::post()
        .uri("/webhook/events")
        .set_json(event)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: WebhookResponse = test::read_body_json(resp).await;
    assert!(!body.success);
    assert!(body.message.starts_with("Invalid event format: "));
    assert_eq!(metrics.snapshot(Source::Tiktok, FunnelStage::Top).failed, 1);
    assert_eq!(log.stream_len("TIKTOK_EVENTS").await, 0);
}

#[actix_web::test]
async fn test_broker_down_reports_publish_failure_and_degraded_health() {
    let log = source_log().await;
    log.set_available(false);
    let state = app_state(&log, Arc::new(AtomicPipelineMetrics::new()), 50_000);
    let app = gateway_app!(state);

    let req = test::TestRequest::post()
        .uri("/webhook/events")
        .set_json(testing::facebook_top_json("fb-1"))
        .to_request();
    let body: WebhookResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!body.success);
    assert_eq!(body.message, "Failed to publish event");

    let req = test::TestRequest::get().uri("/health").to_request();
    let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(health.status, "degraded");
    assert_eq!(health.dependencies.broker, "disconnected");

    let req = test::TestRequest::get().uri("/health/readiness").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let req = test::TestRequest::get().uri("/health/liveness").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
