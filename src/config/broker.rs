//! Broker connection configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Default subject prefix; events land on `<prefix>.<source>`.
pub const DEFAULT_SUBJECT_PREFIX: &str = "raw.events";

/// NATS connection and publish settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// NATS server URL (comma-separated for a cluster).
    pub url: String,
    /// Connection name reported to the server. Defaults to `gateway-<HOSTNAME>`.
    pub client_name: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Timeout for each connection attempt.
    pub connect_timeout_ms: u64,
    /// Heartbeat (PING) interval.
    pub ping_interval_secs: u64,
    /// Consecutive reconnect attempts before giving up. `None` retries forever.
    pub max_reconnects: Option<usize>,
    /// Per-publish acknowledgment timeout.
    pub publish_timeout_ms: u64,
    /// Prefix for publish subjects.
    pub subject_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: None,
            reconnect_delay_ms: 1_000,
            connect_timeout_ms: 10_000,
            ping_interval_secs: 20,
            max_reconnects: None,
            publish_timeout_ms: 5_000,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn client_name(&self) -> String {
        match &self.client_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!(
                "gateway-{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string())
            ),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}
