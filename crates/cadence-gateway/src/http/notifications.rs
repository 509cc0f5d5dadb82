//! GET /notifications/{tenant_id} — unread notifications for UI polling.
//! Notifications are written by the event processor (`hot_lead`,
//! `needs_human`, `objection_detected`, `at_risk`, `appointment_booked`)
//! and have no effect on scheduling.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;

const MAX_PAGE: usize = 100;

pub async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let rows = state
        .store
        .unread_notifications(&tenant_id, MAX_PAGE)
        .map_err(|e| {
            warn!(error = %e, "notification query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let notifications: Vec<Value> = rows
        .into_iter()
        .map(|(kind, payload)| {
            json!({
                "kind": kind,
                "payload": serde_json::from_str::<Value>(&payload).unwrap_or(Value::Null),
            })
        })
        .collect();

    Ok(Json(json!({ "notifications": notifications })))
}
