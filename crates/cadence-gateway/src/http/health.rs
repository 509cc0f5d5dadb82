//! GET /health — liveness plus a cheap component snapshot.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use cadence_bus::QueueName;

use crate::app::AppState;

pub async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, StatusCode> {
    let mut queues = serde_json::Map::new();
    for queue in QueueName::ALL {
        let depth = state.bus.depth(queue).await.unwrap_or(0);
        queues.insert(queue.to_string(), json!(depth));
    }

    let enrollments: Value = match state.store.enrollment_status_counts() {
        Ok(counts) => counts
            .into_iter()
            .map(|(status, n)| (status, json!(n)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        Err(_) => json!(null),
    };

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queues": queues,
        "enrollments": enrollments,
        "held_slots": state.ledger.len(),
    })))
}
