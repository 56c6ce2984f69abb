//! Broker connection state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!                     |             |              |
//!                     +---------> Errored <--------+
//!
//! any non-terminal state -> Closed (drain/shutdown only)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Errored = 4,
    Closed = 5,
}

/// Transport-level occurrences that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// `connect()` was invoked.
    ConnectRequested,
    /// Handshake with a server completed (initial or after reconnect).
    HandshakeAck,
    /// Transient loss of the link; the client keeps retrying.
    Lost,
    /// Non-retryable failure (auth, max reconnects exhausted, setup error).
    Failed,
    /// Session closed after drain.
    Closed,
}

impl ConnectionState {
    /// Next state for `event`. Transitions not in the diagram leave the
    /// state unchanged; `Closed` is terminal.
    pub fn on(self, event: TransportEvent) -> ConnectionState {
        use ConnectionState::*;
        use TransportEvent as E;

        match (self, event) {
            (Closed, _) => Closed,
            (_, E::Closed) => Closed,
            (Disconnected, E::ConnectRequested) => Connecting,
            (Connecting | Reconnecting | Errored | Connected, E::HandshakeAck) => Connected,
            (Connected | Reconnecting, E::Lost) => Reconnecting,
            (Connecting | Connected | Reconnecting, E::Failed) => Errored,
            (state, _) => state,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Errored => "errored",
            ConnectionState::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Errored,
            5 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free shared holder for a `ConnectionState`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Apply `event` atomically, returning `(previous, current)`.
    pub fn apply(&self, event: TransportEvent) -> (ConnectionState, ConnectionState) {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(ConnectionState::from_u8(raw).on(event) as u8)
            })
            .unwrap_or_else(|raw| raw);
        let prev = ConnectionState::from_u8(prev);
        (prev, prev.on(event))
    }
}
