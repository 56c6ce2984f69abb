//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters.
//! All instruments are lazily initialized on the global meter; until the host
//! process installs a meter provider they are no-ops.
//!
//! Naming follows OTel semantic conventions (dot-separated).
//! The OTel Collector / Prometheus exporter converts dots to underscores.

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("event-gateway"));

// ============================================================================
// Ingestion
// ============================================================================

/// Total events accepted by validation.
pub static EVENTS_RECEIVED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gateway.events.received")
        .with_description("Total number of events received (accepted events)")
        .build()
});

/// Total events acknowledged by the broker.
pub static EVENTS_PUBLISHED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gateway.events.published")
        .with_description("Total number of events successfully published to the broker")
        .build()
});

/// Total events that failed to publish.
pub static EVENTS_PUBLISH_ERRORS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gateway.events.publish_errors")
        .with_description("Total number of event publish errors (failed events)")
        .build()
});

// ============================================================================
// Broker
// ============================================================================

/// Broker connectivity (1 = connected, 0 = disconnected).
pub static BROKER_CONNECTION_STATUS: LazyLock<Gauge<u64>> = LazyLock::new(|| {
    METER
        .u64_gauge("gateway.broker.connection_status")
        .with_description("Broker connection status (1 = connected, 0 = disconnected)")
        .build()
});

/// Duration of broker publish operations.
pub static BROKER_PUBLISH_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("gateway.broker.publish.duration")
        .with_description("Duration of broker publish operations")
        .with_unit("s")
        .build()
});

// ============================================================================
// Helper
// ============================================================================

/// Create a source label.
pub fn source_attr(source: &str) -> KeyValue {
    KeyValue::new("source", source.to_string())
}

/// Create an error_type label.
pub fn error_type_attr(error_type: &str) -> KeyValue {
    KeyValue::new("error_type", error_type.to_string())
}

/// Create a subject label.
pub fn subject_attr(subject: &str) -> KeyValue {
    KeyValue::new("subject", subject.to_string())
}
