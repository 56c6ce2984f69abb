//! Request correlation id.
//!
//! Taken from the configured request header when it is well formed, otherwise
//! freshly generated. The resolved id is stored in request extensions for
//! handlers and echoed on the response under the same header.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::validation::validate_correlation_id;

/// Correlation id resolved for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Use `inbound` if it is a valid correlation id, else a new UUIDv4.
    pub fn resolve(inbound: Option<&str>) -> Self {
        match inbound {
            Some(id) => match validate_correlation_id(id) {
                Ok(()) => Self(id.to_string()),
                Err(reason) => {
                    debug!(%reason, "Ignoring inbound correlation id");
                    Self::generate()
                }
            },
            None => Self::generate(),
        }
    }

    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

pub(super) async fn resolve(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header = state.correlation_header().clone();
    let inbound = request.headers().get(&header).and_then(|v| v.to_str().ok());
    let correlation_id = CorrelationId::resolve(inbound);

    // Only [A-Za-z0-9_-] survives resolution, so this always converts.
    let echoed = HeaderValue::from_str(correlation_id.as_str()).ok();
    request.extensions_mut().insert(correlation_id);

    let mut response = next.run(request).await;
    if let Some(value) = echoed {
        response.headers_mut().insert(header, value);
    }
    response
}
