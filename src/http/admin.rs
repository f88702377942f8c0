//! Admin/status endpoints. Thin wrappers around the core components —
//! no business logic lives here.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::instance::InstanceName;

use super::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let primary_ok = state.primary.is_healthy();
    let replica_ok = state.replica.is_healthy();
    let healthy_count = primary_ok as u8 + replica_ok as u8;

    let status = match healthy_count {
        2 => "healthy",
        1 => "degraded",
        _ => "unhealthy",
    };
    let code = if healthy_count >= 1 { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(json!({
            "status": status,
            "healthy_instances": format!("{healthy_count}/2"),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    realtime: bool,
}

pub async fn status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> Json<serde_json::Value> {
    let (primary, replica) = if q.realtime {
        let timeout = Duration::from_secs(5);
        let primary_ok = state.health.check_realtime(InstanceName::Primary, timeout).await;
        let replica_ok = state.health.check_realtime(InstanceName::Replica, timeout).await;
        (primary_ok, replica_ok)
    } else {
        (state.primary.is_healthy(), state.replica.is_healthy())
    };

    Json(json!({
        "realtime": q.realtime,
        "primary": state.primary.snapshot(),
        "replica": state.replica.snapshot(),
        "primary_healthy": primary,
        "replica_healthy": replica,
    }))
}

/// Prometheus text-exposition format over the `Stats` counters.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.snapshot();
    let value = serde_json::to_value(&snapshot).unwrap_or(json!({}));

    let mut out = String::new();
    if let serde_json::Value::Object(map) = value {
        for (key, v) in map {
            let metric = format!("vdb_proxy_{key}");
            out.push_str(&format!("# TYPE {metric} counter\n"));
            let rendered = match v {
                serde_json::Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            out.push_str(&format!("{metric} {rendered}\n"));
        }
    }

    ([("content-type", "text/plain; version=0.0.4")], out).into_response()
}

pub async fn wal_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.wal.status_breakdown().await {
        Ok(breakdown) => Json(serde_json::to_value(breakdown).unwrap_or(json!({}))),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}
