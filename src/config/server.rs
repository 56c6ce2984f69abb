//! HTTP server configuration types.

use serde::Deserialize;

/// Default correlation header, matched case-insensitively.
pub const DEFAULT_CORRELATION_HEADER: &str = "x-correlation-id";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the HTTP listener.
    pub port: u16,
    /// Maximum accepted request body in bytes.
    pub body_limit_bytes: usize,
    /// Header carrying the request correlation id.
    pub correlation_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            body_limit_bytes: 50 * 1024 * 1024,
            correlation_header: DEFAULT_CORRELATION_HEADER.to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port` socket address string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
