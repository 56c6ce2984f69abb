//! `POST /events`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use super::{AppState, CorrelationId};
use crate::event::BatchResult;
use crate::validation::{validate_batch, ValidationError, ValidationIssue};

const ACCEPTED: &str = "accepted";

#[derive(Debug, Serialize)]
struct Accepted {
    status: &'static str,
    #[serde(flatten)]
    result: BatchResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Rejected {
    status_code: u16,
    message: &'static str,
    errors: Vec<ValidationIssue>,
    correlation_id: String,
}

fn reject(
    status: StatusCode,
    message: &'static str,
    errors: Vec<ValidationIssue>,
    correlation_id: &CorrelationId,
) -> Response {
    let body = Rejected {
        status_code: status.as_u16(),
        message,
        errors,
        correlation_id: correlation_id.as_str().to_string(),
    };
    (status, Json(body)).into_response()
}

/// Validate the whole batch, then publish it.
///
/// Validation is all-or-nothing: a single bad element rejects the request
/// before any publish is attempted.
pub(super) async fn ingest(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(correlation_id = %correlation_id.as_str(), error = %e, "Malformed request body");
            let issue = ValidationIssue {
                path: Vec::new(),
                message: e.to_string(),
            };
            return reject(StatusCode::BAD_REQUEST, "Malformed JSON", vec![issue], &correlation_id);
        }
    };

    let batch = match validate_batch(raw) {
        Ok(batch) => batch,
        Err(ValidationError { issues }) => {
            warn!(
                correlation_id = %correlation_id.as_str(),
                issues = issues.len(),
                "Rejected invalid batch"
            );
            return reject(StatusCode::BAD_REQUEST, "Validation failed", issues, &correlation_id);
        }
    };

    // Detached so a client hanging up does not abandon half a batch.
    let pipeline = state.pipeline().clone();
    let id = correlation_id.as_str().to_string();
    let task = tokio::spawn(async move { pipeline.process(batch, &id).await });

    match task.await {
        Ok(result) => (
            StatusCode::CREATED,
            Json(Accepted {
                status: ACCEPTED,
                result,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(correlation_id = %correlation_id.as_str(), error = %e, "Batch task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
