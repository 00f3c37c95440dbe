mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use prepper_client::client::CacheDirective;
use prepper_client::error::ErrorCode;
use prepper_client::transport::{HttpMethod, TransportError};

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/analysis/missing",
        vec![Reply::status(404, json!({"error": "Analysis not found"}))],
    );
    let engine = engine(&transport, 3);

    let err = engine
        .get::<Value>("/api/analysis/missing", None)
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ValidationFailed);
    assert_eq!(err.status, Some(404));
    assert_eq!(err.attempts, 1);
    assert!(err.message.contains("Analysis not found"));
    assert_eq!(transport.count(HttpMethod::Get, "/api/analysis/missing"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_exhausts_retries() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get("/api/health", vec![Reply::refused()]);
    let engine = engine(&transport, 3);

    let err = engine.get::<Value>("/api/health", None).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    assert_eq!(err.attempts, 4);
    assert!(err.is_retryable());
    assert_eq!(transport.count(HttpMethod::Get, "/api/health"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_linearly() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/health",
        vec![
            Reply::status(503, json!({"error": "warming up"})),
            Reply::status(503, json!({"error": "warming up"})),
            Reply::ok(healthy()),
        ],
    );
    let engine = engine(&transport, 3);

    let started = tokio::time::Instant::now();
    let body: Value = engine.get("/api/health", None).await.unwrap();

    assert_eq!(body["status"], "healthy");
    // 100ms after the first failure, 200ms after the second
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(engine.backoff_delay(3), Duration::from_millis(300));
    assert_eq!(transport.count(HttpMethod::Get, "/api/health"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/analysis/a1",
        vec![
            Reply::after(Duration::from_secs(60), Reply::ok(json!({}))),
            Reply::ok(analysis_body("a1", "queued", 0.0)),
        ],
    );
    let engine = engine(&transport, 1);

    let body: Value = engine.get("/api/analysis/a1", None).await.unwrap();
    assert_eq!(body["id"], "a1");
    assert_eq!(transport.count(HttpMethod::Get, "/api/analysis/a1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_last_attempt() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/analysis/slow",
        vec![Reply::after(Duration::from_secs(60), Reply::ok(json!({})))],
    );
    let engine = engine(&transport, 0);

    let err = engine.get::<Value>("/api/analysis/slow", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TimeoutError);
    assert_eq!(err.attempts, 1);
}

#[tokio::test]
async fn test_nested_envelopes_are_unwrapped() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/analysis/a1",
        vec![Reply::ok(envelope(envelope(analysis_body("a1", "analyzing", 40.0))))],
    );
    let engine = engine(&transport, 0);

    let body: Value = engine.get("/api/analysis/a1", None).await.unwrap();
    assert_eq!(body["status"], "analyzing");
    assert!(body.get("success").is_none());
}

#[tokio::test]
async fn test_failure_envelope_is_surfaced_with_its_code() {
    let transport = Arc::new(MockTransport::new());
    transport.on_post(
        "/api/analysis/start",
        vec![Reply::ok(json!({"success": false, "error": "Quota exceeded", "code": "SERVICE_UNAVAILABLE"}))],
    );
    let engine = engine(&transport, 3);

    let err = engine
        .post::<Value>("/api/analysis/start", json!({"proposal_id": "p1"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    assert_eq!(err.message, "Quota exceeded");
    assert_eq!(transport.count(HttpMethod::Post, "/api/analysis/start"), 1);
}

#[tokio::test]
async fn test_malformed_body_is_a_network_error() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get("/api/health", vec![Reply::Raw(200, "<html>gateway</html>".into())]);
    let engine = engine(&transport, 3);

    let err = engine.get::<Value>("/api/health", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NetworkError);
    assert_eq!(transport.count(HttpMethod::Get, "/api/health"), 1);
}

#[tokio::test]
async fn test_cached_read_skips_network() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/analysis/a1/results",
        vec![Reply::ok(envelope(json!({"analysisId": "a1", "issues": []})))],
    );
    let engine = engine(&transport, 0);
    let directive = || Some(CacheDirective::new("results:a1", Duration::from_secs(300)));

    let first: Value = engine.get("/api/analysis/a1/results", directive()).await.unwrap();
    let second: Value = engine.get("/api/analysis/a1/results", directive()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first["analysisId"], "a1");
    assert_eq!(transport.count(HttpMethod::Get, "/api/analysis/a1/results"), 1);
    // The unwrapped payload is what gets cached
    assert_eq!(engine.cache().get("results:a1"), Some(first));
}

#[tokio::test]
async fn test_writes_are_never_cached() {
    let transport = Arc::new(MockTransport::new());
    transport.on_post("/api/analysis/start", vec![Reply::ok(analysis_body("a1", "queued", 0.0))]);
    let engine = engine(&transport, 0);

    let _: Value = engine
        .request(
            "/api/analysis/start",
            HttpMethod::Post,
            Some(json!({})),
            Some(CacheDirective::new("start", Duration::from_secs(60))),
        )
        .await
        .unwrap();
    assert!(!engine.cache().has("start"));
}

#[tokio::test]
async fn test_transport_failure_other_than_unreachable_is_network_error() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/health",
        vec![Reply::Fail(TransportError::Other("tls handshake".into()))],
    );
    let engine = engine(&transport, 0);

    let err = engine.get::<Value>("/api/health", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NetworkError);
}

#[tokio::test]
async fn test_upload_reports_progress_and_is_not_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::status(500, json!({"error": "disk full"}))]);
    let engine = engine(&transport, 3);

    let seen = Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));
    let sink_seen = Arc::clone(&seen);
    let err = engine
        .upload::<Value>(
            "/api/documents/upload",
            pdf("proposal.pdf"),
            Arc::new(move |percent: u8| sink_seen.lock().push(percent)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::UploadFailed);
    assert_eq!(transport.upload_count(), 1);
    assert_eq!(*seen.lock(), vec![50]);
    assert_eq!(transport.uploads()[0].field, "file");
}
