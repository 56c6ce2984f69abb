//! Batch publish pipeline.
//!
//! Fans a validated batch out to the broker, one independent publish per
//! event, and joins on every outcome. A failing event never cancels or delays
//! its siblings.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::broker::{BrokerError, EventBroker};
use crate::event::{timestamp_now, BatchResult, Event, EventBatch, PublishOutcome, Source};
use crate::metrics::MetricsSink;

/// Deterministic subject naming: `<prefix>.<source>`.
#[derive(Debug, Clone)]
pub struct SubjectScheme {
    prefix: String,
}

impl SubjectScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn subject_for(&self, event: &Event) -> String {
        self.subject_for_source(event.source)
    }

    pub fn subject_for_source(&self, source: Source) -> String {
        format!("{}.{}", self.prefix, source.as_str())
    }
}

/// Message id for broker dedup.
///
/// Uses the event's own id when present; otherwise a fresh
/// `<unix-millis>-<uuid v4>` that is never reused.
pub fn message_id(event: &Event) -> String {
    match event.event_id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple()),
    }
}

/// Publishes batches through an `EventBroker`.
#[derive(Clone)]
pub struct PublishPipeline {
    broker: Arc<dyn EventBroker>,
    metrics: Arc<dyn MetricsSink>,
    subjects: SubjectScheme,
}

impl PublishPipeline {
    pub fn new(
        broker: Arc<dyn EventBroker>,
        metrics: Arc<dyn MetricsSink>,
        subjects: SubjectScheme,
    ) -> Self {
        Self {
            broker,
            metrics,
            subjects,
        }
    }

    /// Publish every event and aggregate the outcomes.
    ///
    /// Returns only after each publish has settled, successfully or not.
    pub async fn process(&self, batch: EventBatch, correlation_id: &str) -> BatchResult {
        info!(
            correlation_id = %correlation_id,
            count = batch.len(),
            "Received a batch of events"
        );

        let mut per_source: BTreeMap<&'static str, u64> = BTreeMap::new();
        for event in &batch {
            *per_source.entry(event.source.as_str()).or_insert(0) += 1;
        }
        for (source, count) in per_source {
            self.metrics.increment_received(source, count);
        }

        let now = timestamp_now();
        let publishes = batch.into_iter().map(|mut event| {
            event.stamp(correlation_id, &now);
            self.publish_one(event, correlation_id)
        });
        let outcomes = join_all(publishes).await;

        let result = BatchResult::from_outcomes(&outcomes, correlation_id);
        info!(
            correlation_id = %correlation_id,
            received = result.received,
            processed = result.processed,
            failed = result.failed,
            "Batch published"
        );
        result
    }

    async fn publish_one(&self, event: Event, correlation_id: &str) -> PublishOutcome {
        let subject = self.subjects.subject_for(&event);
        let message_id = message_id(&event);
        let source = event.source.as_str();

        let started = Instant::now();
        let result = match serde_json::to_vec(&event) {
            Ok(payload) => {
                self.broker
                    .publish(&subject, Bytes::from(payload), &message_id)
                    .await
            }
            Err(e) => Err(BrokerError::from(e)),
        };
        self.metrics
            .observe_publish_duration(&subject, started.elapsed().as_secs_f64());

        match result {
            Ok(ack) => {
                self.metrics.increment_published(source);
                if ack.duplicate {
                    debug!(
                        correlation_id = %correlation_id,
                        event_id = %event.identity(),
                        message_id = %message_id,
                        "Broker reported duplicate message id"
                    );
                }
                PublishOutcome::published(ack.duplicate)
            }
            Err(e) => {
                let kind = e.kind().to_string();
                self.metrics.increment_publish_errors(source, &kind);
                error!(
                    correlation_id = %correlation_id,
                    event_id = %event.identity(),
                    subject = %subject,
                    error_kind = %kind,
                    error = %e,
                    "Failed to publish event"
                );
                PublishOutcome::failed(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::MockBroker;
    use crate::event::FunnelStage;
    use crate::metrics::RecordingMetrics;

    fn two_event_batch() -> EventBatch {
        vec![
            Event::new(Source::Facebook, FunnelStage::Top, "click").with_event_id("123"),
            Event::new(Source::Tiktok, FunnelStage::Bottom, "view").with_event_id("456"),
        ]
    }

    fn pipeline(broker: Arc<MockBroker>, metrics: Arc<RecordingMetrics>) -> PublishPipeline {
        PublishPipeline::new(broker, metrics, SubjectScheme::new("raw.events"))
    }

    #[tokio::test]
    async fn test_all_events_published() {
        let broker = Arc::new(MockBroker::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let result = pipeline(broker.clone(), metrics.clone())
            .process(two_event_batch(), "test-correlation-id")
            .await;

        assert_eq!(result.received, 2);
        assert_eq!(result.processed, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.correlation_id, "test-correlation-id");

        assert_eq!(
            metrics.received(),
            vec![("facebook".to_string(), 1), ("tiktok".to_string(), 1)]
        );
        let mut published = metrics.published();
        published.sort();
        assert_eq!(published, vec!["facebook".to_string(), "tiktok".to_string()]);
        assert!(metrics.publish_errors().is_empty());
    }

    #[tokio::test]
    async fn test_second_publish_failure_is_isolated() {
        let broker = Arc::new(MockBroker::new());
        broker.push_success();
        broker.push_failure(BrokerError::named("NatsError", "NATS publish failed"));
        let metrics = Arc::new(RecordingMetrics::new());

        let result = pipeline(broker.clone(), metrics.clone())
            .process(two_event_batch(), "c-1")
            .await;

        assert_eq!(result.received, 2);
        assert_eq!(result.processed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(
            metrics.publish_errors(),
            vec![("tiktok".to_string(), "NatsError".to_string())]
        );
        assert_eq!(metrics.published(), vec!["facebook".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_subject_only_affects_its_source() {
        let broker = Arc::new(MockBroker::new());
        broker.fail_subject("raw.events.tiktok", "StreamNotFound");
        let metrics = Arc::new(RecordingMetrics::new());

        let mut batch = two_event_batch();
        batch.push(Event::new(Source::Facebook, FunnelStage::Bottom, "purchase"));
        let result = pipeline(broker.clone(), metrics.clone())
            .process(batch, "c")
            .await;

        assert_eq!(result.processed, 2);
        assert_eq!(result.failed, 1);
        assert!(broker
            .published()
            .iter()
            .all(|m| m.subject == "raw.events.facebook"));
        assert_eq!(
            metrics.publish_errors(),
            vec![("tiktok".to_string(), "StreamNotFound".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unclassified_error_reported_as_unknown() {
        let broker = Arc::new(MockBroker::new());
        broker.push_failure(BrokerError::Publish {
            kind: None,
            message: "mystery".to_string(),
        });
        let metrics = Arc::new(RecordingMetrics::new());

        let batch = vec![Event::new(Source::Facebook, FunnelStage::Top, "click")];
        let result = pipeline(broker, metrics.clone()).process(batch, "c").await;

        assert_eq!(result.failed, 1);
        assert_eq!(
            metrics.publish_errors(),
            vec![("facebook".to_string(), "unknown".to_string())]
        );
    }

    #[tokio::test]
    async fn test_payload_carries_correlation_and_timestamp() {
        let broker = Arc::new(MockBroker::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let with_ts = Event::new(Source::Tiktok, FunnelStage::Top, "view")
            .with_event_id("a")
            .with_timestamp("2024-05-01T00:00:00Z")
            .with_field("adId", serde_json::json!("ad-1"));
        let batch = vec![
            with_ts,
            Event::new(Source::Facebook, FunnelStage::Bottom, "purchase").with_event_id("b"),
        ];

        pipeline(broker.clone(), metrics).process(batch, "my-id").await;

        let mut messages = broker.published();
        messages.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        let first = messages[0].json();
        let second = messages[1].json();

        assert_eq!(messages[0].subject, "raw.events.tiktok");
        assert_eq!(messages[1].subject, "raw.events.facebook");
        assert_eq!(first["correlationId"], "my-id");
        assert_eq!(second["correlationId"], "my-id");
        assert_eq!(first["timestamp"], "2024-05-01T00:00:00Z");
        assert!(second["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(first["adId"], "ad-1");
    }

    #[tokio::test]
    async fn test_duplicate_ack_counts_as_processed() {
        let broker = Arc::new(MockBroker::new());
        let metrics = Arc::new(RecordingMetrics::new());
        let p = pipeline(broker.clone(), metrics);

        let event = Event::new(Source::Facebook, FunnelStage::Top, "click").with_event_id("dup");
        let first = p.process(vec![event.clone()], "c1").await;
        let second = p.process(vec![event], "c2").await;

        assert_eq!(first.processed, 1);
        assert_eq!(second.processed, 1);
        assert_eq!(second.failed, 0);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_message_ids_are_unique() {
        let broker = Arc::new(MockBroker::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let batch: EventBatch = (0..50)
            .map(|_| Event::new(Source::Tiktok, FunnelStage::Top, "view"))
            .collect();
        let result = pipeline(broker.clone(), metrics).process(batch, "c").await;

        assert_eq!(result.processed, 50);
        assert_eq!(broker.published().len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_run_concurrently() {
        let broker = Arc::new(MockBroker::new());
        broker.set_delay(Duration::from_secs(1));
        let metrics = Arc::new(RecordingMetrics::new());

        let batch: EventBatch = (0..10)
            .map(|i| Event::new(Source::Facebook, FunnelStage::Top, "click").with_event_id(i.to_string()))
            .collect();

        let started = tokio::time::Instant::now();
        let result = pipeline(broker, metrics).process(batch, "c").await;

        assert_eq!(result.processed, 10);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_disconnected_broker_fails_every_event() {
        let broker = Arc::new(MockBroker::new());
        broker.set_connected(false);
        let metrics = Arc::new(RecordingMetrics::new());

        let result = pipeline(broker, metrics.clone())
            .process(two_event_batch(), "c")
            .await;

        assert_eq!(result.processed, 0);
        assert_eq!(result.failed, 2);
        assert!(metrics
            .publish_errors()
            .iter()
            .all(|(_, kind)| kind == "BrokerUnavailable"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let broker = Arc::new(MockBroker::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let result = pipeline(broker.clone(), metrics.clone()).process(Vec::new(), "c").await;

        assert_eq!(result.received, 0);
        assert_eq!(broker.call_count(), 0);
        assert!(metrics.received().is_empty());
    }

    #[test]
    fn test_message_id_prefers_event_id() {
        let event = Event::new(Source::Facebook, FunnelStage::Top, "click").with_event_id("evt-1");
        assert_eq!(message_id(&event), "evt-1");

        let anonymous = Event::new(Source::Facebook, FunnelStage::Top, "click");
        assert_ne!(message_id(&anonymous), message_id(&anonymous));
    }
}
