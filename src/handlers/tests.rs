use std::sync::Arc;

use axum::body::Body;
use axum::http::{request, HeaderMap, HeaderName, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{router, AppState};
use crate::broker::{BrokerError, MockBroker};
use crate::config::DEFAULT_CORRELATION_HEADER;
use crate::health::HealthReporter;
use crate::metrics::RecordingMetrics;
use crate::pipeline::{PublishPipeline, SubjectScheme};

struct Harness {
    broker: Arc<MockBroker>,
    metrics: Arc<RecordingMetrics>,
    app: Router,
}

fn harness_with_limit(body_limit: usize) -> Harness {
    let broker = Arc::new(MockBroker::new());
    let metrics = Arc::new(RecordingMetrics::new());
    let pipeline = PublishPipeline::new(
        broker.clone(),
        metrics.clone(),
        SubjectScheme::new("raw.events"),
    );
    let state = AppState::new(
        pipeline,
        HealthReporter::new(broker.clone()),
        HeaderName::from_static(DEFAULT_CORRELATION_HEADER),
        body_limit,
    );
    Harness {
        broker,
        metrics,
        app: router(state),
    }
}

fn harness() -> Harness {
    harness_with_limit(1024 * 1024)
}

fn post_events() -> request::Builder {
    Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}

fn events_request(body: Value) -> Request<Body> {
    post_events()
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_accepts_valid_batch() {
    let h = harness();
    let body = json!([
        {"eventId": "123", "source": "facebook", "funnelStage": "top", "eventType": "click"},
        {"eventId": "456", "source": "tiktok", "funnelStage": "bottom", "eventType": "view"}
    ]);

    let (status, headers, json) = send(h.app, events_request(body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["received"], 2);
    assert_eq!(json["processed"], 2);
    assert_eq!(json["failed"], 0);

    let echoed = headers.get("x-correlation-id").unwrap().to_str().unwrap();
    assert_eq!(json["correlationId"], echoed);
    let published = h.broker.published();
    assert_eq!(published.len(), 2);
    for message in &published {
        assert_eq!(message.json()["correlationId"], echoed);
    }
}

#[tokio::test]
async fn test_loose_client_fields_are_accepted_and_forwarded() {
    let h = harness();
    let body = json!([{
        "source": "facebook",
        "funnelStage": "top",
        "eventType": "x".repeat(300),
        "timestamp": "2025-03-01",
        "correlationId": 42
    }]);

    let (status, headers, json) = send(h.app, events_request(body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["processed"], 1);
    let echoed = headers.get("x-correlation-id").unwrap().to_str().unwrap();
    let payload = h.broker.published()[0].json();
    assert_eq!(payload["timestamp"], "2025-03-01");
    assert_eq!(payload["correlationId"], echoed);
}

#[tokio::test]
async fn test_inbound_correlation_id_propagates() {
    let h = harness();
    let request = post_events()
        .header("x-correlation-id", "my-id")
        .body(Body::from(
            json!([{"source": "tiktok", "funnelStage": "top", "eventType": "view"}]).to_string(),
        ))
        .unwrap();

    let (status, headers, json) = send(h.app, request).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get("x-correlation-id").unwrap(), "my-id");
    assert_eq!(json["correlationId"], "my-id");
    let published = h.broker.published();
    assert_eq!(published[0].json()["correlationId"], "my-id");
}

#[tokio::test]
async fn test_invalid_source_rejects_whole_batch() {
    let h = harness();
    let body = json!([
        {"source": "facebook", "funnelStage": "top", "eventType": "click"},
        {"source": "invalid-source", "funnelStage": "top", "eventType": "click"}
    ]);

    let (status, _, json) = send(h.app, events_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Validation failed");
    assert_eq!(json["errors"][0]["path"], json!([1, "source"]));
    assert_eq!(h.broker.call_count(), 0);
    assert!(h.metrics.received().is_empty());
    assert!(h.metrics.published().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let h = harness();
    let request = post_events().body(Body::from("[{not json")).unwrap();

    let (status, headers, json) = send(h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Malformed JSON");
    assert!(headers.contains_key("x-correlation-id"));
    assert_eq!(h.broker.call_count(), 0);
}

#[tokio::test]
async fn test_non_array_body_is_bad_request() {
    let h = harness();
    let body = json!({"source": "facebook", "funnelStage": "top", "eventType": "click"});

    let (status, _, _) = send(h.app, events_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_partial_publish_failure_still_accepted() {
    let h = harness();
    h.broker.push_success();
    h.broker
        .push_failure(BrokerError::named("NatsError", "NATS publish failed"));
    let body = json!([
        {"eventId": "1", "source": "facebook", "funnelStage": "top", "eventType": "click"},
        {"eventId": "2", "source": "tiktok", "funnelStage": "top", "eventType": "view"}
    ]);

    let (status, _, json) = send(h.app, events_request(body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["processed"], 1);
    assert_eq!(json["failed"], 1);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let h = harness_with_limit(64);
    let events: Vec<Value> = (0..10)
        .map(|_| json!({"source": "facebook", "funnelStage": "top", "eventType": "click"}))
        .collect();

    let resp = h
        .app
        .oneshot(events_request(Value::Array(events)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.broker.call_count(), 0);
}

#[tokio::test]
async fn test_health_always_ok() {
    let h = harness();
    h.broker.set_connected(false);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, headers, json) = send(h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["broker"], "disconnected");
    assert!(headers.contains_key("x-correlation-id"));
}

#[tokio::test]
async fn test_ready_tracks_broker() {
    let h = harness();
    let request = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

    let (status, _, _) = send(h.app.clone(), request()).await;
    assert_eq!(status, StatusCode::OK);

    h.broker.set_connected(false);
    let (status, _, json) = send(h.app, request()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["reason"], "broker not connected");
}
