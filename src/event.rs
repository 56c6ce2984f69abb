//! Event model shared by validation, publishing and the HTTP surface.
//!
//! Events are loosely-typed marketing records: a handful of required fields
//! are typed, everything else is carried through untouched in `extra`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names as they appear on the wire.
pub mod fields {
    pub const EVENT_ID: &str = "eventId";
    pub const SOURCE: &str = "source";
    pub const FUNNEL_STAGE: &str = "funnelStage";
    pub const EVENT_TYPE: &str = "eventType";
    pub const CORRELATION_ID: &str = "correlationId";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Platform an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Facebook,
    Tiktok,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Facebook, Source::Tiktok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Facebook => "facebook",
            Source::Tiktok => "tiktok",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketing funnel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunnelStage {
    Top,
    Bottom,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 2] = [FunnelStage::Top, FunnelStage::Bottom];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::Top => "top",
            FunnelStage::Bottom => "bottom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated event.
///
/// Unknown fields are preserved in `extra` and re-emitted at the top level
/// when the event is serialized for the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub source: Source,
    pub funnel_stage: FunnelStage,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Client-supplied values are kept verbatim, whatever their JSON type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Minimal event with no identity and no extra fields.
    pub fn new(source: Source, funnel_stage: FunnelStage, event_type: impl Into<String>) -> Self {
        Self {
            event_id: None,
            source,
            funnel_stage,
            event_type: event_type.into(),
            correlation_id: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Event identity for logging, `-` when absent.
    pub fn identity(&self) -> &str {
        self.event_id.as_deref().unwrap_or("-")
    }

    /// Stamp the ingress fields.
    ///
    /// The correlation id always becomes the request's. A client timestamp
    /// is kept unless it is missing, null or an empty string; then `now` is
    /// used.
    pub fn stamp(&mut self, correlation_id: &str, now: &str) {
        self.correlation_id = Some(correlation_id.to_string());
        let missing = match &self.timestamp {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if missing {
            self.timestamp = Some(Value::String(now.to_string()));
        }
    }
}

/// Ordered batch as received. Order only matters for bookkeeping.
pub type EventBatch = Vec<Event>;

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Outcome of a single publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub success: bool,
    pub error_kind: Option<String>,
    /// Broker reported the message id as already seen.
    pub duplicate: bool,
}

impl PublishOutcome {
    pub fn published(duplicate: bool) -> Self {
        Self {
            success: true,
            error_kind: None,
            duplicate,
        }
    }

    pub fn failed(error_kind: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: Some(error_kind.into()),
            duplicate: false,
        }
    }
}

/// Aggregated result of a batch.
///
/// Invariant: `processed + failed == received`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
    pub correlation_id: String,
}

impl BatchResult {
    pub fn from_outcomes(outcomes: &[PublishOutcome], correlation_id: &str) -> Self {
        let received = outcomes.len();
        let processed = outcomes.iter().filter(|o| o.success).count();
        Self {
            received,
            processed,
            failed: received - processed,
            correlation_id: correlation_id.to_string(),
        }
    }
}
