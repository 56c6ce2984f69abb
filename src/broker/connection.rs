//! NATS JetStream broker connection.
//!
//! Owns the single client session for the process. A background observer
//! consumes transport events from the client and keeps `ConnectionState` and
//! the connectivity gauge current; publishes never wait on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_nats::connection::State as TransportState;
use async_nats::jetstream::{self, context::PublishErrorKind, Context};
use async_nats::{ClientError, ConnectOptions, Event, HeaderMap, ServerAddr, ServerError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::{ConnectionState, StateCell, TransportEvent};
use super::{BrokerError, EventBroker, PublishAck, Result};
use crate::config::BrokerConfig;
use crate::metrics::MetricsSink;

/// Manages the broker session and its lifecycle.
pub struct BrokerConnection {
    config: BrokerConfig,
    metrics: Arc<dyn MetricsSink>,
    state: Arc<StateCell>,
    client: OnceLock<async_nats::Client>,
    jetstream: OnceLock<Context>,
    drained: AtomicBool,
}

impl BrokerConnection {
    /// Create an unconnected handle. Call `connect()` before publishing.
    pub fn new(config: BrokerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            metrics,
            state: Arc::new(StateCell::new()),
            client: OnceLock::new(),
            jetstream: OnceLock::new(),
            drained: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// JetStream context, available after `connect()`.
    pub fn jetstream(&self) -> Result<&Context> {
        self.jetstream.get().ok_or(BrokerError::NotInitialized)
    }

    /// Establish the session.
    ///
    /// Reconnects are automatic after the first successful handshake, with a
    /// fixed delay and (by default) no attempt limit. Failure of the initial
    /// connection is returned to the caller and is fatal at startup.
    pub async fn connect(&self) -> Result<()> {
        if self.client.get().is_some() {
            return Ok(());
        }

        let addrs = parse_server_addrs(&self.config.url)?;
        let (prev, _) = self.state.apply(TransportEvent::ConnectRequested);
        if prev != ConnectionState::Disconnected {
            return Err(BrokerError::Connection(format!(
                "connect() called in state {}",
                prev
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(observe_status(rx, self.state.clone(), self.metrics.clone()));

        let reconnect_delay = self.config.reconnect_delay();
        let client_name = self.config.client_name();
        let options = ConnectOptions::new()
            .name(&client_name)
            .max_reconnects(self.config.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_delay)
            .connection_timeout(self.config.connect_timeout())
            .ping_interval(self.config.ping_interval())
            .event_callback(move |event| {
                let tx = tx.clone();
                async move {
                    // Receiver only goes away with the connection itself
                    let _ = tx.send(event);
                }
            });

        let client = match options.connect(addrs).await {
            Ok(client) => client,
            Err(e) => {
                self.state.apply(TransportEvent::Failed);
                self.metrics.set_connection_status(false);
                error!(url = %self.config.url, error = %e, "Error connecting to NATS server");
                return Err(BrokerError::Connection(e.to_string()));
            }
        };

        let mut context = jetstream::new(client.clone());
        context.set_timeout(self.config.publish_timeout());

        let server = client.server_info();

        // Only the caller that moved the state out of Disconnected gets
        // here, so both cells are still empty.
        let stored = self.jetstream.set(context).is_ok() && self.client.set(client).is_ok();
        debug_assert!(stored, "broker session initialised twice");

        // Cells are filled before the state flips so a ready broker can publish.
        self.state.apply(TransportEvent::HandshakeAck);
        self.metrics.set_connection_status(true);
        info!(
            server = %server.server_name,
            host = %server.host,
            client_name = %client_name,
            "Connected to NATS server"
        );
        Ok(())
    }

    /// Flush in-flight messages and close the session.
    ///
    /// Safe to call repeatedly; only the first call drains.
    pub async fn drain(&self) -> Result<()> {
        if self.drained.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(client) = self.client.get() else {
            self.state.apply(TransportEvent::Closed);
            return Ok(());
        };

        info!("Draining NATS connection for graceful shutdown");
        let result = client
            .drain()
            .await
            .map_err(|e| BrokerError::Connection(format!("drain failed: {}", e)));

        self.state.apply(TransportEvent::Closed);
        self.metrics.set_connection_status(false);
        match &result {
            Ok(()) => info!("NATS connection drained and closed"),
            Err(e) => warn!(error = %e, "NATS connection closed with errors"),
        }
        result
    }

    fn map_publish_error(&self, e: jetstream::context::PublishError) -> BrokerError {
        let kind = e.kind();
        if kind == PublishErrorKind::TimedOut {
            return BrokerError::Timeout(self.config.publish_timeout());
        }
        let api_error = std::error::Error::source(&e)
            .and_then(|source| source.downcast_ref::<jetstream::Error>())
            .is_some();
        match publish_error_name(kind, api_error) {
            Some(name) => BrokerError::named(name, e.to_string()),
            None => BrokerError::Publish {
                kind: None,
                message: e.to_string(),
            },
        }
    }
}

/// Broker-reported name for a publish failure.
///
/// `Other` only has a name when the server answered with a JetStream API
/// error; a bare `Other` stays unclassified.
fn publish_error_name(kind: PublishErrorKind, api_error: bool) -> Option<&'static str> {
    match kind {
        PublishErrorKind::StreamNotFound => Some("StreamNotFound"),
        PublishErrorKind::WrongLastMessageId => Some("WrongLastMessageId"),
        PublishErrorKind::WrongLastSequence => Some("WrongLastSequence"),
        PublishErrorKind::TimedOut => Some("Timeout"),
        PublishErrorKind::BrokenPipe => Some("BrokenPipe"),
        PublishErrorKind::MaxAckPending => Some("MaxAckPending"),
        PublishErrorKind::Other if api_error => Some("JetStreamApiError"),
        PublishErrorKind::Other => None,
    }
}

#[async_trait]
impl EventBroker for BrokerConnection {
    async fn publish(&self, subject: &str, payload: Bytes, message_id: &str) -> Result<PublishAck> {
        if !self.is_connected() {
            return Err(BrokerError::Unavailable);
        }
        let context = self.jetstream()?;

        let mut headers = HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, message_id);

        let timeout = self.config.publish_timeout();
        let started = Instant::now();
        let attempt = async {
            context
                .publish_with_headers(subject.to_string(), headers, payload)
                .await?
                .await
        };

        let ack = match tokio::time::timeout(timeout, attempt).await {
            Err(_) => return Err(BrokerError::Timeout(timeout)),
            Ok(Err(e)) => return Err(self.map_publish_error(e)),
            Ok(Ok(ack)) => ack,
        };

        debug!(
            subject = %subject,
            seq = ack.sequence,
            duplicate = ack.duplicate,
            elapsed = ?started.elapsed(),
            "Published"
        );

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    fn is_connected(&self) -> bool {
        if self.state.get() == ConnectionState::Closed {
            return false;
        }
        self.client
            .get()
            .is_some_and(|c| matches!(c.connection_state(), TransportState::Connected))
    }
}

/// Split a comma-separated server list.
fn parse_server_addrs(url: &str) -> Result<Vec<ServerAddr>> {
    url.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ServerAddr>()
                .map_err(|e| BrokerError::Connection(format!("invalid server address '{}': {}", s, e)))
        })
        .collect::<Result<Vec<_>>>()
        .and_then(|addrs| {
            if addrs.is_empty() {
                Err(BrokerError::Connection("no server address configured".to_string()))
            } else {
                Ok(addrs)
            }
        })
}

/// Map a client event onto the state machine.
fn transport_event(event: &Event) -> Option<TransportEvent> {
    match event {
        Event::Connected => Some(TransportEvent::HandshakeAck),
        Event::Disconnected => Some(TransportEvent::Lost),
        Event::Closed => Some(TransportEvent::Closed),
        Event::ClientError(ClientError::MaxReconnects) => Some(TransportEvent::Failed),
        Event::ServerError(ServerError::AuthorizationViolation) => Some(TransportEvent::Failed),
        _ => None,
    }
}

/// Status observer. Runs until the client (and with it the sender) is dropped.
pub(crate) async fn observe_status(
    mut events: mpsc::UnboundedReceiver<Event>,
    state: Arc<StateCell>,
    metrics: Arc<dyn MetricsSink>,
) {
    while let Some(event) = events.recv().await {
        let Some(transition) = transport_event(&event) else {
            debug!(event = %event, "NATS connection event");
            continue;
        };

        let (prev, next) = state.apply(transition);
        metrics.set_connection_status(next == ConnectionState::Connected);

        match next {
            ConnectionState::Connected if prev != ConnectionState::Connected => {
                info!(from = %prev, state = %next, "NATS connection established")
            }
            ConnectionState::Reconnecting | ConnectionState::Errored => {
                warn!(from = %prev, state = %next, event = %event, "NATS connection lost")
            }
            _ => debug!(from = %prev, state = %next, event = %event, "NATS connection status changed"),
        }
    }
    debug!("NATS status observer stopped");
}
