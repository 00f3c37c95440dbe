use serde_json::{json, Value};
use std::sync::Arc;

use prepper_client::cache::ResponseCache;
use prepper_client::client::{AnalysisApiClient, RequestEngine};
use prepper_client::config::{AnalysisConfig, ApiConfig, HealthConfig, RuntimeConfig, UploadConfig};
use prepper_client::health::AvailabilityGate;
use prepper_client::models::UploadFile;
use prepper_client::orchestration::{AnalysisOrchestrator, UploadOrchestrator};

use super::MockTransport;

pub const BASE_URL: &str = "http://backend.test";

/// API settings with short delays so retry tests stay quick.
pub fn api_config(max_retries: u32) -> ApiConfig {
    ApiConfig {
        base_url: BASE_URL.to_string(),
        request_timeout_ms: 5_000,
        max_retries,
        retry_delay_ms: 100,
        ..ApiConfig::default()
    }
}

pub fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.api = api_config(0);
    config.analysis = AnalysisConfig {
        poll_interval_ms: 1_000,
        analysis_timeout_ms: 10_000,
        ..AnalysisConfig::default()
    };
    config
}

pub fn engine(transport: &Arc<MockTransport>, max_retries: u32) -> Arc<RequestEngine> {
    let cache = Arc::new(ResponseCache::new(std::time::Duration::from_secs(600)));
    Arc::new(RequestEngine::new(&api_config(max_retries), transport.clone(), cache))
}

pub fn api(transport: &Arc<MockTransport>) -> AnalysisApiClient {
    AnalysisApiClient::new(engine(transport, 0))
}

pub fn gate(transport: &Arc<MockTransport>) -> Arc<AvailabilityGate> {
    Arc::new(AvailabilityGate::new(api(transport), &HealthConfig::default()))
}

pub fn upload_orchestrator(transport: &Arc<MockTransport>) -> UploadOrchestrator {
    UploadOrchestrator::new(api(transport), UploadConfig::default())
}

pub fn analysis_orchestrator(transport: &Arc<MockTransport>, config: AnalysisConfig) -> AnalysisOrchestrator {
    let api = api(transport);
    let gate = Arc::new(AvailabilityGate::new(api.clone(), &HealthConfig::default()));
    let uploads = UploadOrchestrator::new(api.clone(), UploadConfig::default());
    AnalysisOrchestrator::new(api, gate, uploads, config)
}

pub fn poll_config(poll_interval_ms: u64, analysis_timeout_ms: u64) -> AnalysisConfig {
    AnalysisConfig {
        poll_interval_ms,
        analysis_timeout_ms,
        ..AnalysisConfig::default()
    }
}

pub fn pdf(filename: &str) -> UploadFile {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(4096, b' ');
    UploadFile::new(filename, "application/pdf", bytes)
}

pub fn healthy() -> Value {
    json!({"status": "healthy", "version": "1.4.0"})
}

pub fn analysis_body(id: &str, status: &str, progress: f64) -> Value {
    json!({
        "id": id,
        "proposalId": "p1",
        "status": status,
        "progress": progress,
        "startedAt": "2026-10-01T12:00:00Z"
    })
}

pub fn upload_body(id: &str, s3_key: &str) -> Value {
    json!({
        "id": id,
        "filename": "proposal.pdf",
        "fileSize": 4096,
        "mimeType": "application/pdf",
        "status": "completed",
        "progress": 100,
        "s3Key": s3_key
    })
}

/// Wrap a payload the way the backend's API gateway does.
pub fn envelope(data: Value) -> Value {
    json!({"success": true, "data": data})
}

/// Shared event log plus an observer that appends to it.
pub fn recorder<E>() -> (Arc<parking_lot::Mutex<Vec<E>>>, impl Fn(&E) + Send + Sync + 'static)
where
    E: Clone + Send + 'static,
{
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |event: &E| sink.lock().push(event.clone()))
}
