//! Liveness and readiness.
//!
//! Liveness only says the process is up. Readiness reflects the broker
//! connection: an instance that cannot publish should not take traffic.

use std::sync::Arc;

use serde::Serialize;

use crate::broker::EventBroker;
use crate::event::timestamp_now;

/// Reason reported while the broker is down.
pub const BROKER_NOT_CONNECTED: &str = "broker not connected";

/// Broker link as reported on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerLink {
    Connected,
    Disconnected,
}

/// Liveness snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub broker: BrokerLink,
    pub timestamp: String,
}

/// Readiness verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady { reason: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Answers health checks from the broker's connection state.
#[derive(Clone)]
pub struct HealthReporter {
    broker: Arc<dyn EventBroker>,
}

impl HealthReporter {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    /// Always reports `ok` while the process can answer.
    pub fn liveness(&self) -> Liveness {
        Liveness {
            status: "ok",
            broker: self.broker_link(),
            timestamp: timestamp_now(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self.broker_link() {
            BrokerLink::Connected => Readiness::Ready,
            BrokerLink::Disconnected => Readiness::NotReady {
                reason: BROKER_NOT_CONNECTED.to_string(),
            },
        }
    }

    fn broker_link(&self) -> BrokerLink {
        if self.broker.is_connected() {
            BrokerLink::Connected
        } else {
            BrokerLink::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;

    #[test]
    fn test_ready_when_connected() {
        let broker = Arc::new(MockBroker::new());
        let health = HealthReporter::new(broker);

        assert!(health.readiness().is_ready());
        let live = health.liveness();
        assert_eq!(live.status, "ok");
        assert_eq!(live.broker, BrokerLink::Connected);
    }

    #[test]
    fn test_not_ready_when_disconnected() {
        let broker = Arc::new(MockBroker::new());
        broker.set_connected(false);
        let health = HealthReporter::new(broker.clone());

        assert_eq!(
            health.readiness(),
            Readiness::NotReady {
                reason: "broker not connected".to_string()
            }
        );
        // Liveness is unaffected.
        assert_eq!(health.liveness().status, "ok");

        broker.set_connected(true);
        assert!(health.readiness().is_ready());
    }

    #[test]
    fn test_liveness_serializes_lowercase_link() {
        let broker = Arc::new(MockBroker::new());
        broker.set_connected(false);
        let json = serde_json::to_value(HealthReporter::new(broker).liveness()).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["broker"], "disconnected");
        assert!(json["timestamp"].is_string());
    }
}
