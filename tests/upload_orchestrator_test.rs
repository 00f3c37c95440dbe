mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use prepper_client::config::StreamingConfig;
use prepper_client::error::{ErrorCode, SessionError};
use prepper_client::events::UploadEvent;
use prepper_client::models::UploadFile;
use prepper_client::orchestration::UploadOrchestrator;
use prepper_client::state_machine::UploadStatus;
use prepper_client::streaming::StreamingClient;
use prepper_client::transport::HttpMethod;

async fn first_active(uploads: &UploadOrchestrator) -> String {
    loop {
        if let Some(session) = uploads.active_sessions().first() {
            return session.id.clone();
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_completed_upload_is_rekeyed_to_backend_id() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::ok(envelope(upload_body("doc-9", "uploads/p1/proposal.pdf")))]);
    let uploads = upload_orchestrator(&transport);
    let (events, observer) = recorder::<UploadEvent>();
    uploads.on_event(observer);

    let session = uploads.upload_document(pdf("proposal.pdf")).await.unwrap();

    assert_eq!(session.id, "doc-9");
    assert_eq!(session.status, UploadStatus::Completed);
    assert_eq!(session.progress, 100);
    assert_eq!(session.s3_key.as_deref(), Some("uploads/p1/proposal.pdf"));
    assert_eq!(uploads.session("doc-9"), Some(session.clone()));
    assert!(uploads.active_sessions().is_empty());

    let events = events.lock();
    assert!(matches!(&events[0], UploadEvent::Progress(s) if s.progress == 50));
    let completions: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            UploadEvent::Completed { session, previous_id } => Some((session.id.clone(), previous_id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].0, "doc-9");
    let previous = completions[0].1.as_deref().unwrap();
    assert!(previous.starts_with("upload_"));
    assert!(uploads.session(previous).is_none());
}

#[tokio::test]
async fn test_invalid_file_never_reaches_network() {
    let transport = Arc::new(MockTransport::new());
    let uploads = upload_orchestrator(&transport);

    let docx = UploadFile::new("proposal.docx", "application/msword", vec![0u8; 4096]);
    let err = uploads.upload_document(docx).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ValidationFailed);
    assert_eq!(transport.upload_count(), 0);
    assert!(uploads.active_sessions().is_empty());
}

#[tokio::test]
async fn test_failed_upload_marks_session_and_notifies() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::status(500, json!({"error": "disk full"}))]);
    let uploads = upload_orchestrator(&transport);
    let (events, observer) = recorder::<UploadEvent>();
    uploads.on_event(observer);

    let err = uploads.upload_document(pdf("proposal.pdf")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UploadFailed);

    let events = events.lock();
    let failure = events
        .iter()
        .find_map(|event| match event {
            UploadEvent::Failed { session, code, .. } => Some((session.clone(), *code)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.1, ErrorCode::UploadFailed);
    assert_eq!(failure.0.status, UploadStatus::Failed);
    assert_eq!(uploads.session(&failure.0.id).unwrap().status, UploadStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_uploading() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::after(
        Duration::from_secs(3),
        Reply::ok(upload_body("doc-1", "uploads/p1/proposal.pdf")),
    )]);
    let uploads = upload_orchestrator(&transport);

    let task = tokio::spawn({
        let uploads = uploads.clone();
        async move { uploads.upload_document(pdf("proposal.pdf")).await }
    });
    let upload_id = first_active(&uploads).await;

    let cancelled = uploads.cancel_upload(&upload_id).unwrap();
    assert_eq!(cancelled.status, UploadStatus::Failed);
    assert_eq!(cancelled.error_message.as_deref(), Some("Upload cancelled by user"));

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::UploadFailed);
    assert!(err.to_string().contains("cancelled"));

    // Terminal sessions cannot be cancelled again
    assert!(matches!(
        uploads.cancel_upload(&upload_id),
        Err(SessionError::InvalidState { .. })
    ));
    assert!(uploads.session("doc-1").is_none());
}

#[tokio::test]
async fn test_terminal_status_is_reconciled_once() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::ok(upload_body("doc-9", "uploads/p1/proposal.pdf"))]);
    transport.on_get(
        "/api/documents/upload/doc-9",
        vec![Reply::ok(upload_body("doc-9", "uploads/p1/proposal.pdf"))],
    );
    let uploads = upload_orchestrator(&transport);
    uploads.upload_document(pdf("proposal.pdf")).await.unwrap();

    let first = uploads.get_upload_status("doc-9").await.unwrap();
    let second = uploads.get_upload_status("doc-9").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.status, UploadStatus::Completed);
    assert_eq!(transport.count(HttpMethod::Get, "/api/documents/upload/doc-9"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_read_racing_a_clear_rejects_unknown_status() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::ok(upload_body("doc-9", "uploads/p1/proposal.pdf"))]);
    transport.on_get(
        "/api/documents/upload/doc-9",
        vec![Reply::after(
            Duration::from_millis(500),
            Reply::ok(json!({"id": "doc-9", "status": "archived"})),
        )],
    );
    let uploads = upload_orchestrator(&transport);
    uploads.upload_document(pdf("proposal.pdf")).await.unwrap();

    let read = tokio::spawn({
        let uploads = uploads.clone();
        async move { uploads.get_upload_status("doc-9").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(uploads.clear_session("doc-9"));

    let err = read.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownStatus);
}

#[tokio::test]
async fn test_unknown_upload_is_read_from_backend() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "/api/documents/upload/doc-3",
        vec![Reply::ok(envelope(upload_body("doc-3", "uploads/p3/proposal.pdf")))],
    );
    let uploads = upload_orchestrator(&transport);

    let session = uploads.get_upload_status("doc-3").await.unwrap();
    assert_eq!(session.id, "doc-3");
    assert_eq!(session.status, UploadStatus::Completed);

    let err = uploads.get_upload_status("doc-404").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationFailed);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_progress_updates_active_upload() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::after(
        Duration::from_secs(3),
        Reply::ok(upload_body("doc-5", "uploads/p5/proposal.pdf")),
    )]);
    let uploads = upload_orchestrator(&transport);
    let channel = StreamingClient::new(
        "ws://backend.test/ws",
        Arc::new(MockConnector::new()),
        &StreamingConfig::default(),
    );
    let attachment = uploads.attach_channel(&channel);
    assert_eq!(channel.subscriber_count("upload_progress"), 1);

    let task = tokio::spawn({
        let uploads = uploads.clone();
        async move { uploads.upload_document(pdf("proposal.pdf")).await }
    });
    let upload_id = first_active(&uploads).await;

    channel.dispatch_frame(&format!(
        r#"{{"type":"upload_progress","sessionId":"{upload_id}","data":{{"progress":70}}}}"#
    ));
    assert_eq!(uploads.session(&upload_id).unwrap().progress, 70);

    // Regressions are ignored
    channel.dispatch_frame(&format!(
        r#"{{"type":"upload_progress","sessionId":"{upload_id}","data":{{"progress":20}}}}"#
    ));
    assert_eq!(uploads.session(&upload_id).unwrap().progress, 70);

    drop(attachment);
    assert_eq!(channel.subscriber_count("upload_progress"), 0);

    let session = task.await.unwrap().unwrap();
    assert_eq!(session.id, "doc-5");
    assert_eq!(session.progress, 100);
}

#[tokio::test]
async fn test_clear_only_removes_finished_sessions() {
    let transport = Arc::new(MockTransport::new());
    transport.on_upload(vec![Reply::ok(upload_body("doc-9", "uploads/p1/proposal.pdf"))]);
    let uploads = upload_orchestrator(&transport);
    uploads.upload_document(pdf("proposal.pdf")).await.unwrap();

    assert!(uploads.clear_session("doc-9"));
    assert!(!uploads.clear_session("doc-9"));
    assert!(uploads.session("doc-9").is_none());
}
