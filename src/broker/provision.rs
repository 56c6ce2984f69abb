//! Stream provisioning.
//!
//! Streams are declared statically (see `Config::streams`) and ensured once at
//! startup, before any traffic is accepted. An existing stream is left as-is:
//! its live configuration is never reconciled against the declaration.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    context::GetStreamErrorKind,
    stream::Config as NatsStreamConfig,
    Context, ErrorCode,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{BrokerError, Result};

/// Name of the default stream.
pub const RAW_EVENTS_STREAM: &str = "RAW_EVENTS";

/// How long messages are retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

/// What to drop when a limit is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

/// Where the stream persists messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Declared durable stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub max_age_secs: u64,
    pub max_messages: i64,
    pub max_bytes: i64,
    pub discard: DiscardPolicy,
    pub storage: StorageType,
    pub replicas: usize,
    pub duplicate_window_secs: u64,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self::raw_events(crate::config::DEFAULT_SUBJECT_PREFIX)
    }
}

impl StreamSpec {
    /// Default ingestion stream capturing `<prefix>.*`.
    ///
    /// Limits retention, 7 days / 1M messages / 1 GiB, discard old, file
    /// storage, single replica, 2 minute dedup window.
    pub fn raw_events(subject_prefix: &str) -> Self {
        Self {
            name: RAW_EVENTS_STREAM.to_string(),
            subjects: vec![format!("{}.*", subject_prefix)],
            retention: RetentionPolicy::Limits,
            max_age_secs: 7 * 24 * 60 * 60,
            max_messages: 1_000_000,
            max_bytes: 1024 * 1024 * 1024,
            discard: DiscardPolicy::Old,
            storage: StorageType::File,
            replicas: 1,
            duplicate_window_secs: 2 * 60,
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }

    /// Whether any declared subject pattern matches `subject`.
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|p| subject_matches(p, subject))
    }

    fn to_nats(&self) -> NatsStreamConfig {
        NatsStreamConfig {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            retention: match self.retention {
                RetentionPolicy::Limits => jetstream::stream::RetentionPolicy::Limits,
                RetentionPolicy::Interest => jetstream::stream::RetentionPolicy::Interest,
                RetentionPolicy::WorkQueue => jetstream::stream::RetentionPolicy::WorkQueue,
            },
            max_age: self.max_age(),
            max_messages: self.max_messages,
            max_bytes: self.max_bytes,
            discard: match self.discard {
                DiscardPolicy::Old => jetstream::stream::DiscardPolicy::Old,
                DiscardPolicy::New => jetstream::stream::DiscardPolicy::New,
            },
            storage: match self.storage {
                StorageType::File => jetstream::stream::StorageType::File,
                StorageType::Memory => jetstream::stream::StorageType::Memory,
            },
            num_replicas: self.replicas,
            duplicate_window: self.duplicate_window(),
            ..Default::default()
        }
    }
}

/// NATS subject matching: `*` matches one token, `>` matches the rest.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Stream management operations needed for provisioning.
///
/// Implementations:
/// - `async_nats::jetstream::Context`: JetStream management API
/// - `MemoryStreamAdmin`: In-memory admin for testing
#[async_trait]
pub trait StreamAdmin: Send + Sync {
    /// Look up a stream. `Ok(false)` means "not found"; any other failure is
    /// an error.
    async fn stream_exists(&self, name: &str) -> Result<bool>;

    /// Create a stream with the declared policy.
    async fn create_stream(&self, spec: &StreamSpec) -> Result<()>;
}

#[async_trait]
impl StreamAdmin for Context {
    async fn stream_exists(&self, name: &str) -> Result<bool> {
        match self.get_stream(name).await {
            Ok(mut stream) => {
                if let Ok(info) = stream.info().await {
                    debug!(
                        stream = %name,
                        subjects = ?info.config.subjects,
                        messages = info.state.messages,
                        "Existing stream configuration"
                    );
                }
                Ok(true)
            }
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(js)
                    if js.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(BrokerError::Provision {
                    stream: name.to_string(),
                    message: format!("lookup failed: {}", e),
                }),
            },
        }
    }

    async fn create_stream(&self, spec: &StreamSpec) -> Result<()> {
        Context::create_stream(self, spec.to_nats())
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Provision {
                stream: spec.name.clone(),
                message: format!("create failed: {}", e),
            })
    }
}

/// In-memory stream admin for testing.
#[derive(Debug, Default)]
pub struct MemoryStreamAdmin {
    streams: Mutex<HashMap<String, StreamSpec>>,
    lookup_failure: Mutex<Option<String>>,
    creates: Mutex<usize>,
}

impl MemoryStreamAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every lookup fail with a non-"not found" error.
    pub fn fail_lookups(&self, message: impl Into<String>) {
        *lock(&self.lookup_failure) = Some(message.into());
    }

    pub fn stream(&self, name: &str) -> Option<StreamSpec> {
        lock(&self.streams).get(name).cloned()
    }

    /// Number of create calls issued.
    pub fn create_count(&self) -> usize {
        *lock(&self.creates)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl StreamAdmin for MemoryStreamAdmin {
    async fn stream_exists(&self, name: &str) -> Result<bool> {
        if let Some(message) = lock(&self.lookup_failure).clone() {
            return Err(BrokerError::Provision {
                stream: name.to_string(),
                message,
            });
        }
        Ok(lock(&self.streams).contains_key(name))
    }

    async fn create_stream(&self, spec: &StreamSpec) -> Result<()> {
        *lock(&self.creates) += 1;
        lock(&self.streams).insert(spec.name.clone(), spec.clone());
        Ok(())
    }
}

/// Ensures declared streams exist.
pub struct StreamProvisioner<'a> {
    admin: &'a dyn StreamAdmin,
}

impl<'a> StreamProvisioner<'a> {
    pub fn new(admin: &'a dyn StreamAdmin) -> Self {
        Self { admin }
    }

    /// Create every missing stream. Idempotent across restarts.
    ///
    /// Any lookup failure other than "not found" aborts provisioning.
    pub async fn ensure_streams(&self, specs: &[StreamSpec]) -> Result<()> {
        for spec in specs {
            if self.admin.stream_exists(&spec.name).await? {
                info!(stream = %spec.name, "Stream already exists");
                continue;
            }
            self.admin.create_stream(spec).await?;
            info!(
                stream = %spec.name,
                subjects = ?spec.subjects,
                replicas = spec.replicas,
                "Stream created"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("raw.events.*", "raw.events.facebook"));
        assert!(!subject_matches("raw.events.*", "raw.events.facebook.top"));
        assert!(subject_matches("raw.events.>", "raw.events.facebook.top"));
        assert!(!subject_matches("raw.events.>", "raw.events"));
        assert!(!subject_matches("raw.events.*", "other.events.tiktok"));
        assert!(subject_matches("raw.events.tiktok", "raw.events.tiktok"));
    }

    #[test]
    fn test_raw_events_spec() {
        let spec = StreamSpec::raw_events("raw.events");
        assert_eq!(spec.name, "RAW_EVENTS");
        assert_eq!(spec.max_age(), Duration::from_secs(604_800));
        assert_eq!(spec.duplicate_window(), Duration::from_secs(120));
        assert_eq!(spec.max_bytes, 1_073_741_824);
        assert!(spec.captures("raw.events.tiktok"));
    }

    #[test]
    fn test_to_nats_config() {
        let config = StreamSpec::raw_events("raw.events").to_nats();
        assert_eq!(config.name, "RAW_EVENTS");
        assert_eq!(config.subjects, vec!["raw.events.*".to_string()]);
        assert_eq!(config.max_messages, 1_000_000);
        assert_eq!(config.num_replicas, 1);
        assert_eq!(config.duplicate_window, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_creates_missing_stream() {
        let admin = MemoryStreamAdmin::new();
        let specs = vec![StreamSpec::raw_events("raw.events")];

        StreamProvisioner::new(&admin).ensure_streams(&specs).await.unwrap();

        assert_eq!(admin.create_count(), 1);
        assert_eq!(admin.stream("RAW_EVENTS"), Some(specs[0].clone()));
    }

    #[tokio::test]
    async fn test_repeated_provisioning_is_noop() {
        let admin = MemoryStreamAdmin::new();
        let specs = vec![StreamSpec::raw_events("raw.events")];
        let provisioner = StreamProvisioner::new(&admin);

        provisioner.ensure_streams(&specs).await.unwrap();
        provisioner.ensure_streams(&specs).await.unwrap();

        assert_eq!(admin.create_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_stream_is_not_reconciled() {
        let admin = MemoryStreamAdmin::new();
        let original = StreamSpec::raw_events("raw.events");
        admin.create_stream(&original).await.unwrap();

        let changed = StreamSpec {
            replicas: 3,
            ..original.clone()
        };
        StreamProvisioner::new(&admin)
            .ensure_streams(&[changed])
            .await
            .unwrap();

        assert_eq!(admin.stream("RAW_EVENTS").unwrap().replicas, 1);
        assert_eq!(admin.create_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_error_is_fatal() {
        let admin = MemoryStreamAdmin::new();
        admin.fail_lookups("permission denied");

        let result = StreamProvisioner::new(&admin)
            .ensure_streams(&[StreamSpec::raw_events("raw.events")])
            .await;

        assert!(matches!(result, Err(BrokerError::Provision { .. })));
        assert_eq!(admin.create_count(), 0);
    }
}
