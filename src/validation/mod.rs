//! Input validation for external data.
//!
//! Batches are validated as a unit: every issue in every element is collected
//! and the batch is either accepted whole or rejected whole.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::event::{fields, Event, EventBatch, FunnelStage, Source};

/// Length limits for validated fields.
pub mod limits {
    /// Maximum correlation ID length.
    pub const MAX_CORRELATION_ID_LENGTH: usize = 128;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const BATCH_NOT_ARRAY: &str = "expected an array of events";
    pub const EVENT_NOT_OBJECT: &str = "expected an object";
    pub const REQUIRED: &str = "required";
    pub const EXPECTED_STRING: &str = "expected string";
    pub const SOURCE_INVALID: &str = "invalid option: expected one of \"facebook\"|\"tiktok\"";
    pub const FUNNEL_STAGE_INVALID: &str = "invalid option: expected one of \"top\"|\"bottom\"";
    pub const EVENT_TYPE_EMPTY: &str = "must contain at least 1 character";

    pub const CORRELATION_ID_TOO_LONG: &str = "correlation_id exceeds maximum length";
    pub const CORRELATION_ID_INVALID_CHARS: &str =
        "correlation_id contains invalid characters (allowed: a-zA-Z0-9_-)";
}

/// One step in a path to the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// A single validation failure, addressed by field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl ValidationIssue {
    fn at(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            path: vec![PathSegment::Index(index), PathSegment::Key(field.to_string())],
            message: message.into(),
        }
    }

    /// Dotted form of the path, e.g. `1.source`.
    pub fn dotted_path(&self) -> String {
        self.path
            .iter()
            .map(|seg| match seg {
                PathSegment::Index(i) => i.to_string(),
                PathSegment::Key(k) => k.clone(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Whole-batch rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.dotted_path(), i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    fn root(message: &str) -> Self {
        Self {
            issues: vec![ValidationIssue {
                path: Vec::new(),
                message: message.to_string(),
            }],
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

/// Validate a raw batch payload.
///
/// Rules per element:
/// - Must be an object
/// - `source`: one of the fixed sources
/// - `funnelStage`: one of the fixed stages
/// - `eventType`: non-empty string
/// - `eventId`: optional string
///
/// `timestamp` is kept verbatim and `correlationId` is replaced at publish
/// time, so neither can fail a batch. Any other field is passed through
/// unchanged.
pub fn validate_batch(raw: Value) -> Result<EventBatch, ValidationError> {
    let elements = match raw {
        Value::Array(elements) => elements,
        _ => return Err(ValidationError::root(errmsg::BATCH_NOT_ARRAY)),
    };

    let mut issues = Vec::new();
    let mut events = Vec::with_capacity(elements.len());

    for (index, element) in elements.into_iter().enumerate() {
        match element {
            Value::Object(map) => match validate_event(index, map) {
                Ok(event) => events.push(event),
                Err(mut errs) => issues.append(&mut errs),
            },
            _ => issues.push(ValidationIssue {
                path: vec![PathSegment::Index(index)],
                message: errmsg::EVENT_NOT_OBJECT.to_string(),
            }),
        }
    }

    if issues.is_empty() {
        Ok(events)
    } else {
        Err(ValidationError { issues })
    }
}

fn validate_event(
    index: usize,
    mut map: Map<String, Value>,
) -> Result<Event, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let source = match map.remove(fields::SOURCE) {
        None => {
            issues.push(ValidationIssue::at(index, fields::SOURCE, errmsg::REQUIRED));
            None
        }
        Some(Value::String(s)) => {
            let parsed = Source::parse(&s);
            if parsed.is_none() {
                issues.push(ValidationIssue::at(index, fields::SOURCE, errmsg::SOURCE_INVALID));
            }
            parsed
        }
        Some(_) => {
            issues.push(ValidationIssue::at(index, fields::SOURCE, errmsg::SOURCE_INVALID));
            None
        }
    };

    let funnel_stage = match map.remove(fields::FUNNEL_STAGE) {
        None => {
            issues.push(ValidationIssue::at(index, fields::FUNNEL_STAGE, errmsg::REQUIRED));
            None
        }
        Some(Value::String(s)) => {
            let parsed = FunnelStage::parse(&s);
            if parsed.is_none() {
                issues.push(ValidationIssue::at(
                    index,
                    fields::FUNNEL_STAGE,
                    errmsg::FUNNEL_STAGE_INVALID,
                ));
            }
            parsed
        }
        Some(_) => {
            issues.push(ValidationIssue::at(
                index,
                fields::FUNNEL_STAGE,
                errmsg::FUNNEL_STAGE_INVALID,
            ));
            None
        }
    };

    let event_type = match map.remove(fields::EVENT_TYPE) {
        None => {
            issues.push(ValidationIssue::at(index, fields::EVENT_TYPE, errmsg::REQUIRED));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            issues.push(ValidationIssue::at(index, fields::EVENT_TYPE, errmsg::EVENT_TYPE_EMPTY));
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            issues.push(ValidationIssue::at(index, fields::EVENT_TYPE, errmsg::EXPECTED_STRING));
            None
        }
    };

    let event_id = optional_string(index, &mut map, fields::EVENT_ID, &mut issues);
    // Overwritten with the request's id before publishing.
    let correlation_id = match map.remove(fields::CORRELATION_ID) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    let timestamp = map.remove(fields::TIMESTAMP).filter(|v| !v.is_null());

    match (source, funnel_stage, event_type) {
        (Some(source), Some(funnel_stage), Some(event_type)) if issues.is_empty() => Ok(Event {
            event_id,
            source,
            funnel_stage,
            event_type,
            correlation_id,
            timestamp,
            extra: map,
        }),
        _ => Err(issues),
    }
}

fn optional_string(
    index: usize,
    map: &mut Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match map.remove(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            issues.push(ValidationIssue::at(index, field, errmsg::EXPECTED_STRING));
            None
        }
    }
}

/// Validate a correlation ID.
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters
/// - May contain: letters (a-zA-Z), digits (0-9), underscore (_), hyphen (-)
pub fn validate_correlation_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(errmsg::REQUIRED.to_string());
    }
    if id.len() > limits::MAX_CORRELATION_ID_LENGTH {
        return Err(format!(
            "{} (max: {}, got: {})",
            errmsg::CORRELATION_ID_TOO_LONG,
            limits::MAX_CORRELATION_ID_LENGTH,
            id.len()
        ));
    }

    for ch in id.chars() {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-') {
            return Err(errmsg::CORRELATION_ID_INVALID_CHARS.to_string());
        }
    }

    Ok(())
}
