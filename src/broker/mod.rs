//! Broker connectivity and stream lifecycle.
//!
//! This module contains:
//! - `EventBroker` trait: per-message publish plus a connectivity check
//! - `BrokerConnection`: NATS JetStream implementation with a status observer
//! - `StreamProvisioner`: idempotent stream creation at startup
//! - `MockBroker`: In-memory broker for testing

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub mod connection;
pub mod mock;
pub mod provision;
pub mod state;

pub use connection::BrokerConnection;
pub use mock::MockBroker;
pub use provision::{
    DiscardPolicy, MemoryStreamAdmin, RetentionPolicy, StorageType, StreamAdmin, StreamProvisioner,
    StreamSpec,
};
pub use state::{ConnectionState, StateCell, TransportEvent};

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Classification used when the broker gives no name for a failure.
pub const UNKNOWN_ERROR_KIND: &str = "unknown";

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: not connected")]
    Unavailable,

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Publish failed: {message}")]
    Publish {
        /// Broker-reported error name, if any.
        kind: Option<String>,
        message: String,
    },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Provisioning stream '{stream}' failed: {message}")]
    Provision { stream: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker connection not initialized")]
    NotInitialized,
}

impl BrokerError {
    /// Build a publish error carrying a broker-reported name.
    pub fn named(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            kind: Some(kind.into()),
            message: message.into(),
        }
    }

    /// Error kind used as the `error_type` metric label.
    pub fn kind(&self) -> &str {
        match self {
            BrokerError::Unavailable => "BrokerUnavailable",
            BrokerError::Timeout(_) => "Timeout",
            BrokerError::Publish { kind: Some(k), .. } if !k.is_empty() => k.as_str(),
            BrokerError::Publish { .. } => UNKNOWN_ERROR_KIND,
            BrokerError::Serialization(_) => "SerializationError",
            BrokerError::NotInitialized => "NotInitialized",
            BrokerError::Connection(_) | BrokerError::Provision { .. } => UNKNOWN_ERROR_KIND,
        }
    }
}

/// Broker acknowledgment of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// The message id was already seen inside the dedup window.
    pub duplicate: bool,
}

/// Interface for durable per-message publishing.
///
/// Implementations:
/// - `BrokerConnection`: NATS JetStream
/// - `MockBroker`: In-memory mock for testing
///
/// Publish calls are independent and may be issued concurrently against the
/// same handle.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Publish one message, tagged with `message_id` for broker-side dedup.
    ///
    /// Fails fast with `BrokerError::Unavailable` when not connected.
    async fn publish(&self, subject: &str, payload: Bytes, message_id: &str)
        -> Result<PublishAck>;

    /// Current transport connectivity. Must not perform I/O.
    fn is_connected(&self) -> bool;
}
