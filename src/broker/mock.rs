//! Mock broker implementation for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BrokerError, EventBroker, PublishAck, Result};

/// A message accepted by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
    pub message_id: String,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Scripted response for a future publish call.
#[derive(Debug)]
enum Scripted {
    Succeed,
    Fail(BrokerError),
}

/// Mock broker for testing.
///
/// Stores each unique message id once; repeats are acknowledged with
/// `duplicate = true`, like a broker dedup window that never expires.
pub struct MockBroker {
    connected: AtomicBool,
    sequence: AtomicU64,
    calls: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
    seen_ids: Mutex<HashSet<String>>,
    script: Mutex<VecDeque<Scripted>>,
    subject_failures: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<Duration>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
            seen_ids: Mutex::new(HashSet::new()),
            script: Mutex::new(VecDeque::new()),
            subject_failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Next publish call (in call order) succeeds.
    pub fn push_success(&self) {
        lock(&self.script).push_back(Scripted::Succeed);
    }

    /// Next publish call (in call order) fails with `error`.
    pub fn push_failure(&self, error: BrokerError) {
        lock(&self.script).push_back(Scripted::Fail(error));
    }

    /// Every publish to `subject` fails with the named error.
    pub fn fail_subject(&self, subject: impl Into<String>, kind: impl Into<String>) {
        lock(&self.subject_failures).insert(subject.into(), kind.into());
    }

    /// Delay every publish by `delay` before it settles.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Messages durably stored (duplicates excluded).
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Total publish calls issued, including failures and duplicates.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBroker for MockBroker {
    async fn publish(&self, subject: &str, payload: Bytes, message_id: &str) -> Result<PublishAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_connected() {
            return Err(BrokerError::Unavailable);
        }

        // Consumed at call time so the script follows call order even when
        // delays reorder completion.
        let scripted = lock(&self.script).pop_front();
        let subject_failure = lock(&self.subject_failures).get(subject).cloned();

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(Scripted::Fail(error)) = scripted {
            return Err(error);
        }
        if let Some(kind) = subject_failure {
            return Err(BrokerError::named(kind, format!("publish to {} rejected", subject)));
        }

        let duplicate = !lock(&self.seen_ids).insert(message_id.to_string());
        if !duplicate {
            lock(&self.published).push(PublishedMessage {
                subject: subject.to_string(),
                payload,
                message_id: message_id.to_string(),
            });
        }

        Ok(PublishAck {
            stream: "MOCK".to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            duplicate,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
