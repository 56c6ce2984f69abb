use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::event::timestamp_now;
use crate::health::{Liveness, Readiness};

pub(super) async fn liveness(State(state): State<AppState>) -> Json<Liveness> {
    Json(state.health().liveness())
}

pub(super) async fn readiness(State(state): State<AppState>) -> Response {
    let timestamp = timestamp_now();
    match state.health().readiness() {
        Readiness::Ready => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "timestamp": timestamp })),
        )
            .into_response(),
        Readiness::NotReady { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "reason": reason, "timestamp": timestamp })),
        )
            .into_response(),
    }
}
