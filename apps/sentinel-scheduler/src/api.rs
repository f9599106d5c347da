//! Operator JSON API. Every route requires `Authorization: Bearer <api.token>`.

use axum::{
    Router,
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use sentinel_db::models::monitoring::{LogFilter, Page};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::CoreError;
use crate::scheduler::CycleScheduler;

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<CycleScheduler>,
    pub token: Arc<str>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/health/check", post(force_check))
        .route("/logs", get(get_logs))
        .route("/maintenance", get(get_maintenance).post(set_maintenance))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token.is_empty() || token != &*state.token {
        warn!("Rejected operator API call to {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::TransientUpstream { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Operator API error: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.scheduler.get_status().await)
}

async fn force_check(State(state): State<ApiState>) -> Response {
    match state.scheduler.force_check().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub event_type: Option<String>,
    pub success: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn get_logs(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Response {
    let filter = LogFilter {
        event_type: query.event_type.filter(|t| !t.is_empty()),
        success: query.success,
        since: None,
    };
    let page = Page::new(query.page.unwrap_or(1), query.per_page.unwrap_or(50));
    match state.scheduler.get_logs(&filter, page).await {
        Ok(logs) => Json(json!({
            "page": page.number,
            "per_page": page.per_page,
            "logs": logs,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_maintenance(State(state): State<ApiState>) -> impl IntoResponse {
    let maintenance = state.scheduler.maintenance();
    Json(json!({
        "state": maintenance.snapshot().await,
        "message": maintenance.message(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub active: bool,
    pub reason: Option<String>,
}

async fn set_maintenance(
    State(state): State<ApiState>,
    Json(body): Json<MaintenanceRequest>,
) -> impl IntoResponse {
    let reason = body.reason.filter(|r| !r.trim().is_empty());
    Json(state.scheduler.set_maintenance(body.active, reason).await)
}
