//! Report endpoints without a reachable database
//!
//! Filter validation happens before any query, so these run against a lazy
//! pool pointed at a closed port.

use actix_web::{http::StatusCode, test, web, App};
use prometheus::Registry;
use reporting_service::health::HealthResponse;
use reporting_service::{configure, AppState, ReportRepository};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use std::time::{Duration, Instant};

fn offline_state() -> web::Data<AppState> {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(300))
        .connect_lazy("postgres://reporter@127.0.0.1:1/reports")
        .unwrap();

    web::Data::new(AppState {
        reports: ReportRepository::new(pool, 10),
        query_timeout: Duration::from_secs(2),
        registry: Registry::new(),
        started_at: Instant::now(),
    })
}

macro_rules! reporter_app {
    () => {
        test::init_service(App::new().app_data(offline_state()).configure(configure)).await
    };
}

#[actix_web::test]
async fn test_invalid_filters_are_rejected_before_querying() {
    let app = reporter_app!();

    let cases = [
        ("/reports/events?from=yesterday", "RFC 3339"),
        ("/reports/events?to=2025-13-01T00:00:00Z", "RFC 3339"),
        ("/reports/revenue?source=myspace", "unknown source"),
        ("/reports/events?funnelStage=middle", "unknown funnel stage"),
        (
            "/reports/demographics?from=2025-01-16T00:00:00Z&to=2025-01-15T00:00:00Z",
            "later than",
        ),
    ];

    for (uri, expected) in cases {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid report filter: "), "{}", error);
        assert!(error.contains(expected), "{} -> {}", uri, error);
    }
}

#[actix_web::test]
async fn test_database_outage_is_reported_without_details() {
    let app = reporter_app!();

    let req = test::TestRequest::get()
        .uri("/reports/events?source=facebook")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_server_error());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(!body["error"].as_str().unwrap().contains("127.0.0.1"));
}

#[actix_web::test]
async fn test_health_reports_unreachable_database() {
    let app = reporter_app!();

    let req = test::TestRequest::get().uri("/health").to_request();
    let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(health.status, "degraded");
    assert_eq!(health.dependencies.database, "disconnected");

    let req = test::TestRequest::get().uri("/health/readiness").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let req = test::TestRequest::get().uri("/health/liveness").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
