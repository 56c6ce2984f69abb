//! Metrics sink consumed by the broker connection and the publish pipeline.
//!
//! Implementations:
//! - `OtelMetrics`: OpenTelemetry instruments (see `utils::metrics`)
//! - `RecordingMetrics`: In-memory recorder for testing

use std::sync::Mutex;

use crate::utils::metrics::{
    error_type_attr, source_attr, subject_attr, BROKER_CONNECTION_STATUS,
    BROKER_PUBLISH_DURATION, EVENTS_PUBLISHED_TOTAL, EVENTS_PUBLISH_ERRORS_TOTAL,
    EVENTS_RECEIVED_TOTAL,
};

/// Interface for recording gateway metrics.
///
/// Calls must be cheap and infallible; they sit on the publish path.
pub trait MetricsSink: Send + Sync {
    fn increment_received(&self, source: &str, count: u64);
    fn increment_published(&self, source: &str);
    fn increment_publish_errors(&self, source: &str, error_kind: &str);
    fn set_connection_status(&self, connected: bool);
    fn observe_publish_duration(&self, subject: &str, seconds: f64);
}

/// Metrics sink backed by the global OpenTelemetry meter.
#[derive(Debug, Default, Clone, Copy)]
pub struct OtelMetrics;

impl MetricsSink for OtelMetrics {
    fn increment_received(&self, source: &str, count: u64) {
        EVENTS_RECEIVED_TOTAL.add(count, &[source_attr(source)]);
    }

    fn increment_published(&self, source: &str) {
        EVENTS_PUBLISHED_TOTAL.add(1, &[source_attr(source)]);
    }

    fn increment_publish_errors(&self, source: &str, error_kind: &str) {
        EVENTS_PUBLISH_ERRORS_TOTAL.add(1, &[source_attr(source), error_type_attr(error_kind)]);
    }

    fn set_connection_status(&self, connected: bool) {
        BROKER_CONNECTION_STATUS.record(u64::from(connected), &[]);
    }

    fn observe_publish_duration(&self, subject: &str, seconds: f64) {
        BROKER_PUBLISH_DURATION.record(seconds, &[subject_attr(subject)]);
    }
}

/// A single recorded metric call.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricCall {
    Received { source: String, count: u64 },
    Published { source: String },
    PublishError { source: String, error_kind: String },
    ConnectionStatus(bool),
    PublishDuration { subject: String },
}

/// Metrics sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<MetricCall>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MetricCall> {
        self.lock().clone()
    }

    pub fn received(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                MetricCall::Received { source, count } => Some((source.clone(), *count)),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                MetricCall::Published { source } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn publish_errors(&self) -> Vec<(String, String)> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                MetricCall::PublishError { source, error_kind } => {
                    Some((source.clone(), error_kind.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Most recent connection status, if any was recorded.
    pub fn connection_status(&self) -> Option<bool> {
        self.lock().iter().rev().find_map(|c| match c {
            MetricCall::ConnectionStatus(connected) => Some(*connected),
            _ => None,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricCall>> {
        // A poisoned recorder still holds valid data
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, call: MetricCall) {
        self.lock().push(call);
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_received(&self, source: &str, count: u64) {
        self.push(MetricCall::Received {
            source: source.to_string(),
            count,
        });
    }

    fn increment_published(&self, source: &str) {
        self.push(MetricCall::Published {
            source: source.to_string(),
        });
    }

    fn increment_publish_errors(&self, source: &str, error_kind: &str) {
        self.push(MetricCall::PublishError {
            source: source.to_string(),
            error_kind: error_kind.to_string(),
        });
    }

    fn set_connection_status(&self, connected: bool) {
        self.push(MetricCall::ConnectionStatus(connected));
    }

    fn observe_publish_duration(&self, subject: &str, _seconds: f64) {
        self.push(MetricCall::PublishDuration {
            subject: subject.to_string(),
        });
    }
}
