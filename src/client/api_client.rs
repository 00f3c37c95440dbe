//! Typed backend endpoints over the [`RequestEngine`].

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::request_engine::{CacheDirective, RequestEngine};
use crate::constants::{cache, endpoints};
use crate::error::{ErrorCode, RequestError, RequestOutcome};
use crate::models::{
    AnalysisSessionResponse, ComplianceIssue, ComplianceResults, HealthResponse,
    StartAnalysisRequest, UploadFile, UploadSessionResponse,
};
use crate::transport::ProgressSink;

/// Whether a read may be answered from the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    Cached,
    /// Skip the cached copy; the fresh result still replaces it
    Fresh,
}

#[derive(Debug, Clone)]
pub struct AnalysisApiClient {
    engine: Arc<RequestEngine>,
}

impl AnalysisApiClient {
    pub fn new(engine: Arc<RequestEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RequestEngine> {
        &self.engine
    }

    pub fn base_url(&self) -> &str {
        self.engine.base_url()
    }

    pub async fn upload_document(
        &self,
        file: UploadFile,
        progress: ProgressSink,
    ) -> RequestOutcome<UploadSessionResponse> {
        self.engine
            .upload(endpoints::DOCUMENT_UPLOAD, file, progress)
            .await
    }

    pub async fn get_upload_status(
        &self,
        upload_id: &str,
        policy: ReadPolicy,
    ) -> RequestOutcome<UploadSessionResponse> {
        let directive = self.directive(
            cache::upload_status_key(upload_id),
            cache::UPLOAD_STATUS_TTL,
            policy,
        );
        self.engine
            .get(&endpoints::upload_status(upload_id), Some(directive))
            .await
    }

    pub async fn start_analysis(
        &self,
        request: &StartAnalysisRequest,
    ) -> RequestOutcome<AnalysisSessionResponse> {
        let body = serde_json::to_value(request).map_err(|e| {
            RequestError::new(ErrorCode::ValidationFailed, format!("Unserializable request: {e}"))
        })?;
        self.engine.post(endpoints::ANALYSIS_START, body).await
    }

    pub async fn get_analysis_status(
        &self,
        analysis_id: &str,
        policy: ReadPolicy,
    ) -> RequestOutcome<AnalysisSessionResponse> {
        let directive = self.directive(
            cache::analysis_status_key(analysis_id),
            cache::ANALYSIS_STATUS_TTL,
            policy,
        );
        self.engine
            .get(&endpoints::analysis(analysis_id), Some(directive))
            .await
    }

    /// Ask the backend to stop an analysis and drop any cached status for it.
    pub async fn cancel_analysis(&self, analysis_id: &str) -> RequestOutcome<()> {
        let _: Value = self.engine.delete(&endpoints::analysis(analysis_id)).await?;
        self.engine
            .cache()
            .delete(&cache::analysis_status_key(analysis_id));
        Ok(())
    }

    pub async fn get_analysis_results(
        &self,
        analysis_id: &str,
    ) -> RequestOutcome<ComplianceResults> {
        let directive = CacheDirective::new(cache::results_key(analysis_id), cache::RESULTS_TTL);
        self.engine
            .get(&endpoints::analysis_results(analysis_id), Some(directive))
            .await
    }

    pub async fn get_issue_details(&self, issue_id: &str) -> RequestOutcome<ComplianceIssue> {
        let directive = CacheDirective::new(cache::issue_key(issue_id), cache::ISSUE_DETAILS_TTL);
        self.engine
            .get(&endpoints::issue_details(issue_id), Some(directive))
            .await
    }

    /// Health is never served from the response cache; the availability gate
    /// keeps its own snapshot.
    pub async fn health_check(&self) -> RequestOutcome<HealthResponse> {
        self.engine.get(endpoints::HEALTH, None).await
    }

    fn directive(&self, key: String, ttl: std::time::Duration, policy: ReadPolicy) -> CacheDirective {
        if policy == ReadPolicy::Fresh {
            debug!(key = %key, "Bypassing cached read");
            self.engine.cache().delete(&key);
        }
        CacheDirective::new(key, ttl)
    }
}
