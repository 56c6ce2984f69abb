//! HTTP surface.
//!
//! Endpoints:
//! - `GET /health`: liveness, always 200
//! - `GET /ready`: 200 while the broker is connected, 503 otherwise
//! - `POST /events`: validate and publish a batch

mod correlation;
mod events;
mod health;

#[cfg(test)]
mod tests;

pub use correlation::CorrelationId;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::health::HealthReporter;
use crate::pipeline::PublishPipeline;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: PublishPipeline,
    health: HealthReporter,
    correlation_header: HeaderName,
    body_limit: usize,
}

impl AppState {
    pub fn new(
        pipeline: PublishPipeline,
        health: HealthReporter,
        correlation_header: HeaderName,
        body_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                health,
                correlation_header,
                body_limit,
            }),
        }
    }

    pub fn pipeline(&self) -> &PublishPipeline {
        &self.inner.pipeline
    }

    pub fn health(&self) -> &HealthReporter {
        &self.inner.health
    }

    pub fn correlation_header(&self) -> &HeaderName {
        &self.inner.correlation_header
    }
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    let header = state.correlation_header().clone();
    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let correlation_id = request
            .headers()
            .get(&header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        tracing::info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            %correlation_id
        )
    });

    Router::new()
        .route("/health", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/events", post(events::ingest))
        .layer(DefaultBodyLimit::max(state.inner.body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            correlation::resolve,
        ))
        .layer(trace)
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
