use crate::error::{ReportError, Result};
use crate::filters::{ReportFilters, ReportQuery};
use crate::AppState;
use actix_middleware::CorrelationId;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;
use tracing::{error, info};

/// Successful report body
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse<T> {
    pub success: bool,
    pub data: T,
    pub correlation_id: String,
    pub timestamp: String,
}

/// Validate the query string, run `report` under the query timeout and wrap the result
async fn run_report<T, F, Fut>(
    state: &AppState,
    name: &'static str,
    correlation_id: CorrelationId,
    query: ReportQuery,
    report: F,
) -> Result<HttpResponse>
where
    T: Serialize,
    F: FnOnce(ReportFilters) -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let filters = ReportFilters::try_from(query).map_err(ReportError::InvalidFilter)?;
    let started = Instant::now();

    let data = tokio::time::timeout(state.query_timeout, report(filters))
        .await
        .map_err(|_| ReportError::Timeout(state.query_timeout))?
        .map_err(|e| {
            error!(correlation_id = %correlation_id, report = name, "Report query failed: {}", e);
            ReportError::from(e)
        })?;

    info!(
        correlation_id = %correlation_id,
        report = name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Report generated"
    );

    Ok(HttpResponse::Ok().json(ReportResponse {
        success: true,
        data,
        correlation_id: correlation_id.0,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /reports/events
pub async fn event_stats(
    state: web::Data<AppState>,
    correlation_id: CorrelationId,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse> {
    let reports = state.reports.clone();
    run_report(&state, "events", correlation_id, query.into_inner(), |filters| async move {
        let range = filters.time_range(chrono::Utc::now());
        reports.event_stats(&filters, range).await
    })
    .await
}

/// GET /reports/revenue
pub async fn revenue(
    state: web::Data<AppState>,
    correlation_id: CorrelationId,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse> {
    let reports = state.reports.clone();
    run_report(&state, "revenue", correlation_id, query.into_inner(), |filters| async move {
        let range = filters.time_range(chrono::Utc::now());
        reports.revenue(&filters, range).await
    })
    .await
}

/// GET /reports/demographics
pub async fn demographics(
    state: web::Data<AppState>,
    correlation_id: CorrelationId,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse> {
    let reports = state.reports.clone();
    run_report(&state, "demographics", correlation_id, query.into_inner(), |filters| async move {
        let range = filters.time_range(chrono::Utc::now());
        reports.demographics(&filters, range).await
    })
    .await
}
