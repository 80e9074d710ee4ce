//! HTTP API surface backing the dashboard and external tooling.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

/// `GET /api/stats`: aggregate signal statistics.
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.history.lock() {
        Ok(history) => Json(history.stats()).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `GET /api/logs/:filename`: one day's persisted readings, 404 when the
/// file is missing or unparsable.
pub async fn read_log(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let result = state
        .logger
        .lock()
        .ok()
        .map(|logger| logger.read_log_file(&filename));
    match result {
        Some(Ok(entries)) => Json(entries).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Log file not found" })),
        )
            .into_response(),
    }
}

/// `GET /api/logs`: available log file names.
pub async fn list_logs(State(state): State<AppState>) -> Response {
    match state.logger.lock() {
        Ok(logger) => Json(logger.list_log_files()).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `GET /api/latest-data`: most recent processed record, `{}` before the
/// first sample arrives.
pub async fn latest_data(State(state): State<AppState>) -> Response {
    let latest = state.latest_record.read().ok().and_then(|r| r.clone());
    match latest {
        Some(record) => Json(record).into_response(),
        None => Json(json!({})).into_response(),
    }
}

/// `GET /api/connections`: per-producer connection records.
pub async fn connections(State(state): State<AppState>) -> Response {
    let snapshot = state.connections.producer_snapshot();
    Json(json!({
        "totalConnections": snapshot.len(),
        "connections": snapshot,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// `GET /api/health`: server health summary.
pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "uptime": state.uptime_seconds(),
        "connections": {
            "producers": state.connections.producer_count(),
            "dashboards": state.connections.dashboard_count(),
        },
        "latency": state.latency_stats(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// `GET /api/camera/latest`: most recent camera frame as a JPEG, 404 when
/// no frame has been received.
pub async fn camera_latest(State(state): State<AppState>) -> Response {
    let frame = state.latest_frame.read().ok().and_then(|f| f.clone());
    match frame.and_then(|f| f.jpeg_bytes()) {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, "No camera frame available").into_response(),
    }
}
