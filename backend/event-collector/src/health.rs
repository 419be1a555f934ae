use crate::AppState;
use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Dependencies {
    pub broker: String,
    pub database: String,
    pub consumers: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime: f64,
    pub version: String,
    pub dependencies: Dependencies,
}

fn connection(connected: bool) -> String {
    if connected { "connected" } else { "disconnected" }.to_string()
}

fn consumer_status(state: &AppState) -> String {
    let stopped = state.consumers.stopped();
    if stopped.is_empty() {
        "running".to_string()
    } else {
        let sources: Vec<&str> = stopped.iter().map(|s| s.as_str()).collect();
        format!("stopped: {}", sources.join(","))
    }
}

async fn check(state: &AppState) -> (bool, bool) {
    futures::join!(state.log.health_check(), state.sink.health_check())
}

/// GET /health
pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let (broker, database) = check(&state).await;
    let consumers = state.consumers.all_running();

    HttpResponse::Ok().json(HealthResponse {
        status: if broker && database && consumers {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: Dependencies {
            broker: connection(broker),
            database: connection(database),
            consumers: consumer_status(&state),
        },
    })
}

/// GET /health/readiness (503 unless broker and database answer and every consumer runs)
pub async fn readiness_check(state: web::Data<AppState>) -> impl Responder {
    let (broker, database) = check(&state).await;
    let ready = broker && database && state.consumers.all_running();
    let body = serde_json::json!({
        "ready": ready,
        "checks": {
            "broker": connection(broker),
            "database": connection(database),
            "consumers": consumer_status(&state),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}

/// GET /metrics
pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    match pipeline_metrics::encode_registry(&state.registry) {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ConsumerLiveness;
    use crate::sink::InMemoryEventSink;
    use crate::CollectorConfig;
    use actix_web::{http::StatusCode, test, App};
    use event_log::InMemoryEventLog;
    use event_schema::Source;
    use prometheus::Registry;
    use std::sync::Arc;
    use std::time::Instant;

    fn state(sink: InMemoryEventSink, consumers: Arc<ConsumerLiveness>) -> web::Data<AppState> {
        web::Data::new(AppState {
            log: Arc::new(InMemoryEventLog::new()),
            sink: Arc::new(sink),
            consumers,
            registry: Registry::new(),
            started_at: Instant::now(),
        })
    }

    fn liveness() -> Arc<ConsumerLiveness> {
        let plans = CollectorConfig::default().consumer_plans().unwrap();
        Arc::new(ConsumerLiveness::new(&plans))
    }

    #[actix_web::test]
    async fn test_database_outage_degrades_health() {
        let sink = InMemoryEventSink::new();
        sink.set_available(false);
        let state = state(sink, liveness());
        let app = test::init_service(App::new().app_data(state).configure(crate::configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.dependencies.broker, "connected");
        assert_eq!(health.dependencies.database, "disconnected");

        let req = test::TestRequest::get().uri("/health/readiness").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_stopped_consumer_degrades_health() {
        let consumers = liveness();
        let app = test::init_service(
            App::new()
                .app_data(state(InMemoryEventSink::new(), consumers.clone()))
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.dependencies.consumers, "running");

        consumers.mark_stopped(Source::Tiktok);

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.dependencies.consumers, "stopped: tiktok");

        let req = test::TestRequest::get().uri("/health/readiness").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
