//! event-gateway: HTTP ingestion front door for marketing events.
//!
//! ## Architecture
//! ```text
//! [POST /events] -> [validate] -> [PublishPipeline] -> [JetStream RAW_EVENTS]
//! ```
//!
//! ## Configuration
//! - GATEWAY_CONFIG: YAML config file path (default: ./config.yaml if present)
//! - GATEWAY__<SECTION>__<KEY>: structured overrides, e.g. GATEWAY__BROKER__URL
//! - NATS_URL, PORT: shorthand for broker.url and server.port
//! - GATEWAY_LOG: tracing filter (default: info)

use std::sync::Arc;

use axum::http::HeaderName;
use tracing::{error, info};

use event_gateway::broker::{BrokerConnection, StreamProvisioner};
use event_gateway::config::Config;
use event_gateway::handlers::{self, AppState};
use event_gateway::health::HealthReporter;
use event_gateway::metrics::{MetricsSink, OtelMetrics};
use event_gateway::pipeline::{PublishPipeline, SubjectScheme};
use event_gateway::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let correlation_header = HeaderName::from_bytes(config.server.correlation_header.as_bytes())?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(OtelMetrics);
    let connection = Arc::new(BrokerConnection::new(config.broker.clone(), metrics.clone()));

    connection.connect().await.map_err(|e| {
        error!(error = %e, "Could not connect to broker");
        e
    })?;

    StreamProvisioner::new(connection.jetstream()?)
        .ensure_streams(&config.streams)
        .await
        .map_err(|e| {
            error!(error = %e, "Stream provisioning failed");
            e
        })?;

    let pipeline = PublishPipeline::new(
        connection.clone(),
        metrics,
        SubjectScheme::new(config.broker.subject_prefix.clone()),
    );
    let state = AppState::new(
        pipeline,
        HealthReporter::new(connection.clone()),
        correlation_header,
        config.server.body_limit_bytes,
    );

    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;
    let served = handlers::serve(listener, handlers::router(state), shutdown_signal()).await;

    if let Err(e) = connection.drain().await {
        error!(error = %e, "Broker drain failed");
    }
    served?;

    info!("event-gateway stopped");
    Ok(())
}
