//! # Analysis Orchestrator
//!
//! Starts compliance analyses and follows each one to `completed` or `failed`.
//!
//! Progress arrives two ways. With a streaming channel attached, pushes on
//! `analysis_progress`, `analysis_complete` and `error` are applied to known
//! sessions as they arrive. Every running session also gets a monitor task
//! that ticks right away and then every `poll_interval`. A tick fetches the
//! status whenever push is unavailable and, unless `poll_with_streaming` is
//! off, alongside push as well. Both paths go through the same monotonic
//! `apply`, so whichever reports first wins and the other is ignored once the
//! session is terminal.
//!
//! The monitor gives up after `max(1, analysis_timeout / poll_interval)` ticks,
//! fetched or not, and fails the session with `WORKFLOW_TIMEOUT`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::{ChannelAttachment, InFlightSet, UploadOrchestrator};
use crate::client::{AnalysisApiClient, ReadPolicy};
use crate::config::AnalysisConfig;
use crate::constants::{document_storage_key, messages, topics, DEFAULT_DOCUMENT_FILENAME};
use crate::error::{ErrorCode, SessionError, SessionResult};
use crate::events::{AnalysisEvent, ObserverHandle, ObserverRegistry, SessionObserver, DEFAULT_EVENT_CAPACITY};
use crate::health::AvailabilityGate;
use crate::logging::log_session_transition;
use crate::models::{
    AnalysisRequest, AnalysisSession, AnalysisSessionResponse, ComplianceIssue, ComplianceResults,
    StartAnalysisRequest,
};
use crate::state_machine::{AnalysisStatus, AnalysisUpdate, AppliedChange};
use crate::streaming::channel_client::WeakStreamingClient;
use crate::streaming::{ChannelMessage, ErrorPayload, ProgressPayload, StreamingClient};
use crate::validation::validate_analysis_request;

/// Everything needed to start the same analysis again.
#[derive(Debug, Clone, PartialEq)]
struct StartParameters {
    proposal_id: String,
    document_id: String,
    filename: String,
    s3_key: String,
    frameworks: Vec<String>,
    provider: Option<String>,
}

impl StartParameters {
    fn body(&self) -> StartAnalysisRequest {
        StartAnalysisRequest {
            proposal_id: self.proposal_id.clone(),
            document_id: self.document_id.clone(),
            filename: self.filename.clone(),
            s3_key: self.s3_key.clone(),
            frameworks: self.frameworks.clone(),
            provider: self.provider.clone(),
        }
    }
}

struct AnalysisRecord {
    session: AnalysisSession,
    parameters: StartParameters,
    reconciled: bool,
}

struct AnalysisInner {
    api: AnalysisApiClient,
    gate: Arc<AvailabilityGate>,
    uploads: UploadOrchestrator,
    config: AnalysisConfig,
    sessions: DashMap<String, AnalysisRecord>,
    in_flight: InFlightSet,
    pollers: DashMap<String, JoinHandle<()>>,
    observers: ObserverRegistry<AnalysisEvent>,
    channel: Mutex<Option<WeakStreamingClient>>,
    attachments: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<AnalysisInner>,
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("sessions", &self.inner.sessions.len())
            .field("pollers", &self.inner.pollers.len())
            .field("attachments", &self.inner.attachments.load(Ordering::SeqCst))
            .finish()
    }
}

impl AnalysisOrchestrator {
    pub fn new(
        api: AnalysisApiClient,
        gate: Arc<AvailabilityGate>,
        uploads: UploadOrchestrator,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AnalysisInner {
                api,
                gate,
                uploads,
                config,
                sessions: DashMap::new(),
                in_flight: InFlightSet::default(),
                pollers: DashMap::new(),
                observers: ObserverRegistry::new(DEFAULT_EVENT_CAPACITY),
                channel: Mutex::new(None),
                attachments: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Validate, upload the document if one is attached, and start the
    /// analysis. The returned session is already being monitored.
    #[instrument(skip(self, request), fields(proposal_id = %request.proposal_id))]
    pub async fn start_analysis(&self, request: AnalysisRequest) -> SessionResult<AnalysisSession> {
        validate_analysis_request(&request, &self.inner.config)?;

        let proposal_id = request.proposal_id.trim().to_string();
        let _claim = self.inner.in_flight.claim(&proposal_id)?;
        if self.inner.has_active_session(&proposal_id) {
            return Err(SessionError::AlreadyInFlight { key: proposal_id });
        }

        let frameworks = if request.frameworks.is_empty() {
            self.inner.config.default_frameworks.clone()
        } else {
            request.frameworks
        };

        let parameters = match request.file {
            Some(file) => {
                let upload = self.inner.uploads.upload_document(file).await?;
                let filename = request.filename.unwrap_or_else(|| upload.filename.clone());
                let s3_key = upload
                    .s3_key
                    .clone()
                    .unwrap_or_else(|| document_storage_key(&proposal_id, &filename));
                StartParameters {
                    proposal_id,
                    document_id: upload.id,
                    filename,
                    s3_key,
                    frameworks,
                    provider: request.provider,
                }
            }
            None => {
                let filename = request
                    .filename
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_FILENAME.to_string());
                StartParameters {
                    s3_key: document_storage_key(&proposal_id, &filename),
                    proposal_id,
                    document_id: request.document_id.unwrap_or_default(),
                    filename,
                    frameworks,
                    provider: request.provider,
                }
            }
        };

        self.launch(parameters).await
    }

    /// Start a failed analysis again under a new session id. The failed
    /// record is dropped once the new one exists.
    #[instrument(skip(self))]
    pub async fn retry_analysis(&self, analysis_id: &str) -> SessionResult<AnalysisSession> {
        let parameters = {
            let record = self
                .inner
                .sessions
                .get(analysis_id)
                .ok_or_else(|| SessionError::not_found(analysis_id))?;
            if record.session.status != AnalysisStatus::Failed {
                return Err(SessionError::InvalidState {
                    session_id: analysis_id.to_string(),
                    status: record.session.status.to_string(),
                });
            }
            record.parameters.clone()
        };

        let _claim = self.inner.in_flight.claim(&parameters.proposal_id)?;
        if self.inner.has_active_session(&parameters.proposal_id) {
            return Err(SessionError::AlreadyInFlight {
                key: parameters.proposal_id,
            });
        }
        let session = self.launch(parameters).await?;
        if session.id != analysis_id {
            self.inner.sessions.remove(analysis_id);
        }
        info!(previous_id = analysis_id, analysis_id = %session.id, "Analysis retried");
        Ok(session)
    }

    /// Local copy for running sessions; a finished session is confirmed
    /// against the backend once, then served locally.
    pub async fn get_analysis_status(&self, analysis_id: &str) -> SessionResult<AnalysisSession> {
        let known = self.inner.sessions.get(analysis_id).map(|record| {
            (
                record.session.clone(),
                record.session.is_terminal() && !record.reconciled,
            )
        });

        match known {
            Some((session, false)) => Ok(session),
            Some((session, true)) => {
                match self
                    .inner
                    .api
                    .get_analysis_status(analysis_id, ReadPolicy::Fresh)
                    .await
                {
                    Ok(response) => self.inner.reconcile(analysis_id, &response),
                    Err(e) => {
                        debug!(analysis_id, error = %e, "Status refresh failed; serving last known state");
                        Ok(session)
                    }
                }
            }
            None => {
                let response = self
                    .inner
                    .api
                    .get_analysis_status(analysis_id, ReadPolicy::Cached)
                    .await?;
                Ok(AnalysisSession::from_response(&response, &response.proposal_id)?)
            }
        }
    }

    /// Ask the backend to stop the analysis, then fail the session locally.
    #[instrument(skip(self))]
    pub async fn cancel_analysis(&self, analysis_id: &str) -> SessionResult<AnalysisSession> {
        {
            let record = self
                .inner
                .sessions
                .get(analysis_id)
                .ok_or_else(|| SessionError::not_found(analysis_id))?;
            if record.session.is_terminal() {
                return Err(SessionError::InvalidState {
                    session_id: analysis_id.to_string(),
                    status: record.session.status.to_string(),
                });
            }
        }

        self.inner.api.cancel_analysis(analysis_id).await?;
        self.inner.stop_poller(analysis_id);
        self.inner.apply(
            analysis_id,
            AnalysisUpdate::failed(ErrorCode::AnalysisFailed, messages::ANALYSIS_CANCELLED)
                .with_step(messages::ANALYSIS_CANCELLED_STEP),
        );
        info!(analysis_id, "Analysis cancelled");

        self.session(analysis_id)
            .ok_or_else(|| SessionError::not_found(analysis_id))
    }

    pub async fn get_results(&self, analysis_id: &str) -> SessionResult<ComplianceResults> {
        Ok(self.inner.api.get_analysis_results(analysis_id).await?)
    }

    pub async fn get_issue_details(&self, issue_id: &str) -> SessionResult<ComplianceIssue> {
        Ok(self.inner.api.get_issue_details(issue_id).await?)
    }

    pub fn session(&self, analysis_id: &str) -> Option<AnalysisSession> {
        self.inner
            .sessions
            .get(analysis_id)
            .map(|record| record.session.clone())
    }

    pub fn active_sessions(&self) -> Vec<AnalysisSession> {
        self.inner
            .sessions
            .iter()
            .filter(|record| !record.session.is_terminal())
            .map(|record| record.session.clone())
            .collect()
    }

    /// Stop polling one session. Push updates still apply.
    pub fn stop_monitoring(&self, analysis_id: &str) -> bool {
        self.inner.stop_poller(analysis_id)
    }

    pub fn is_monitoring(&self, analysis_id: &str) -> bool {
        self.inner.pollers.contains_key(analysis_id)
    }

    /// Forget a finished session. Running sessions are kept.
    pub fn clear_session(&self, analysis_id: &str) -> bool {
        self.inner
            .sessions
            .remove_if(analysis_id, |_, record| record.session.is_terminal())
            .is_some()
    }

    pub fn clear_all_sessions(&self) {
        self.inner.stop_all_pollers();
        self.inner.sessions.clear();
    }

    /// Abort every poller. Sessions are kept as they are.
    pub fn shutdown(&self) {
        let stopped = self.inner.stop_all_pollers();
        info!(stopped, "Analysis orchestrator shut down");
    }

    pub fn register_observer(&self, observer: Arc<dyn SessionObserver<AnalysisEvent>>) -> ObserverHandle {
        self.inner.observers.register(observer)
    }

    pub fn on_event<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&AnalysisEvent) + Send + Sync + 'static,
    {
        self.inner.observers.register_fn(observer)
    }

    pub fn remove_observer(&self, handle: ObserverHandle) -> bool {
        self.inner.observers.remove(handle)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AnalysisEvent> {
        self.inner.observers.subscribe()
    }

    /// Apply analysis pushes from `channel` to known sessions.
    pub fn attach_channel(&self, channel: &StreamingClient) -> ChannelAttachment {
        *self.inner.channel.lock() = Some(channel.downgrade());
        let mut attachment = ChannelAttachment::new(channel).counted(Arc::clone(&self.inner.attachments));

        let weak = Arc::downgrade(&self.inner);
        let id = channel.subscribe_fn(topics::ANALYSIS_PROGRESS, move |message| {
            with_inner(&weak, |inner| inner.handle_progress(message))
        });
        attachment.push(topics::ANALYSIS_PROGRESS, id);

        let weak = Arc::downgrade(&self.inner);
        let id = channel.subscribe_fn(topics::ANALYSIS_COMPLETE, move |message| {
            with_inner(&weak, |inner| inner.handle_complete(message))
        });
        attachment.push(topics::ANALYSIS_COMPLETE, id);

        let weak = Arc::downgrade(&self.inner);
        let id = channel.subscribe_fn(topics::ERROR, move |message| {
            with_inner(&weak, |inner| inner.handle_error(message))
        });
        attachment.push(topics::ERROR, id);

        attachment
    }

    async fn launch(&self, parameters: StartParameters) -> SessionResult<AnalysisSession> {
        if !self.inner.gate.is_service_healthy().await {
            warn!(proposal_id = %parameters.proposal_id, "Analysis service unavailable; not starting");
            return Err(SessionError::ServiceUnavailable(
                messages::SERVICE_NOT_READY.to_string(),
            ));
        }

        let response = self.inner.api.start_analysis(&parameters.body()).await?;
        let session = AnalysisSession::from_response(&response, &parameters.proposal_id)?;
        let analysis_id = session.id.clone();
        info!(
            analysis_id = %analysis_id,
            proposal_id = %parameters.proposal_id,
            status = %session.status,
            "Analysis started"
        );

        self.inner.sessions.insert(
            analysis_id.clone(),
            AnalysisRecord {
                session: session.clone(),
                parameters,
                reconciled: false,
            },
        );

        if !session.is_terminal() {
            AnalysisInner::spawn_poller(&self.inner, analysis_id);
        }
        Ok(session)
    }
}

fn with_inner(weak: &Weak<AnalysisInner>, f: impl FnOnce(&AnalysisInner)) {
    if let Some(inner) = weak.upgrade() {
        f(&inner)
    }
}

impl AnalysisInner {
    fn has_active_session(&self, proposal_id: &str) -> bool {
        self.sessions
            .iter()
            .any(|record| record.session.proposal_id == proposal_id && !record.session.is_terminal())
    }

    fn push_available(&self) -> bool {
        if self.attachments.load(Ordering::SeqCst) == 0 {
            return false;
        }
        self.channel
            .lock()
            .as_ref()
            .and_then(WeakStreamingClient::upgrade)
            .is_some_and(|channel| channel.is_connected())
    }

    fn should_fetch(&self) -> bool {
        self.config.poll_with_streaming || !self.push_available()
    }

    fn is_terminal(&self, analysis_id: &str) -> bool {
        self.sessions
            .get(analysis_id)
            .map_or(true, |record| record.session.is_terminal())
    }

    fn spawn_poller(inner: &Arc<Self>, analysis_id: String) {
        let weak = Arc::downgrade(inner);
        let interval = inner.config.poll_interval();
        let max_attempts = inner.config.max_poll_attempts();
        let id = analysis_id.clone();

        let handle = tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.is_terminal(&id) {
                    return;
                }

                attempts += 1;
                if inner.should_fetch() {
                    if inner.poll_once(&id).await {
                        return;
                    }
                } else {
                    debug!(analysis_id = %id, attempts, "Push channel live; skipping status fetch");
                }
                if attempts >= max_attempts {
                    warn!(analysis_id = %id, attempts, "Analysis did not finish in time");
                    inner.apply(
                        &id,
                        AnalysisUpdate::failed(ErrorCode::WorkflowTimeout, messages::ANALYSIS_TIMEOUT),
                    );
                    return;
                }
                drop(inner);
                tokio::time::sleep(interval).await;
            }
        });

        debug!(analysis_id = %analysis_id, max_attempts, "Polling analysis status");
        if let Some(previous) = inner.pollers.insert(analysis_id, handle) {
            previous.abort();
        }
    }

    /// One status fetch. Returns whether the session is now terminal.
    async fn poll_once(&self, analysis_id: &str) -> bool {
        let terminal = match self
            .api
            .get_analysis_status(analysis_id, ReadPolicy::Fresh)
            .await
        {
            Ok(response) => self.apply_response(analysis_id, &response),
            Err(e) if e.code == ErrorCode::ValidationFailed => {
                error!(analysis_id, status = ?e.status, error = %e.message, "Analysis status rejected");
                self.apply(analysis_id, AnalysisUpdate::failed(e.code, e.message));
                true
            }
            Err(e) => {
                warn!(analysis_id, code = %e.code, error = %e.message, "Analysis status poll failed");
                false
            }
        };
        terminal || self.is_terminal(analysis_id)
    }

    fn apply_response(&self, analysis_id: &str, response: &AnalysisSessionResponse) -> bool {
        let status = match response.parsed_status() {
            Ok(status) => status,
            Err(e) => {
                warn!(analysis_id, error = %e, "Ignoring unknown analysis status");
                return false;
            }
        };

        let error = status.is_failure().then(|| {
            (
                ErrorCode::AnalysisFailed,
                response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| messages::DEFAULT_ERROR.to_string()),
            )
        });
        self.apply(
            analysis_id,
            AnalysisUpdate {
                status: Some(status),
                progress: Some(response.normalized_progress()),
                current_step: response.current_step.clone(),
                estimated_completion: response.estimated_completion,
                error,
            },
        );
        status.is_terminal()
    }

    fn apply(&self, analysis_id: &str, update: AnalysisUpdate) -> Option<AppliedChange> {
        let (change, session, from) = {
            let mut record = self.sessions.get_mut(analysis_id)?;
            let from = record.session.status;
            let change = record.session.apply(update)?;
            (change, record.session.clone(), from)
        };

        if from != session.status {
            log_session_transition("analysis", analysis_id, &from.to_string(), &session.status.to_string(), session.progress);
        }
        match change {
            AppliedChange::Progress => {}
            AppliedChange::Completed => {
                self.stop_poller(analysis_id);
                info!(analysis_id, "Analysis completed");
            }
            AppliedChange::Failed => {
                self.stop_poller(analysis_id);
                error!(
                    analysis_id,
                    code = ?session.error_code,
                    error = session.error_message.as_deref().unwrap_or_default(),
                    "Analysis failed"
                );
            }
        }

        self.observers
            .notify(AnalysisEvent::from_change(change, session));
        Some(change)
    }

    fn reconcile(&self, analysis_id: &str, response: &AnalysisSessionResponse) -> SessionResult<AnalysisSession> {
        let Some(mut record) = self.sessions.get_mut(analysis_id) else {
            return Ok(AnalysisSession::from_response(response, &response.proposal_id)?);
        };
        if record.session.completed_at.is_none() {
            record.session.completed_at = response.completed_at;
        }
        if record.session.error_message.is_none() {
            record.session.error_message = response.error_message.clone();
        }
        record.reconciled = true;
        Ok(record.session.clone())
    }

    fn stop_poller(&self, analysis_id: &str) -> bool {
        match self.pollers.remove(analysis_id) {
            Some((_, handle)) => {
                handle.abort();
                debug!(analysis_id, "Stopped polling analysis status");
                true
            }
            None => false,
        }
    }

    fn stop_all_pollers(&self) -> usize {
        let ids: Vec<String> = self.pollers.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.stop_poller(id)).count()
    }

    fn handle_progress(&self, message: &ChannelMessage) {
        if !self.sessions.contains_key(&message.session_id) {
            return;
        }
        let payload: ProgressPayload = match message.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(analysis_id = %message.session_id, error = %e, "Malformed analysis progress payload");
                return;
            }
        };
        let status = match payload.status.as_deref().map(str::parse::<AnalysisStatus>) {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                warn!(analysis_id = %message.session_id, error = %e, "Ignoring unknown analysis status");
                return;
            }
            None => None,
        };

        self.apply(
            &message.session_id,
            AnalysisUpdate {
                status,
                progress: payload.normalized_progress(),
                current_step: payload.current_step,
                ..AnalysisUpdate::default()
            },
        );
    }

    fn handle_complete(&self, message: &ChannelMessage) {
        if self.sessions.contains_key(&message.session_id) {
            self.apply(&message.session_id, AnalysisUpdate::completed());
        }
    }

    fn handle_error(&self, message: &ChannelMessage) {
        if !self.sessions.contains_key(&message.session_id) {
            return;
        }
        let payload: ErrorPayload = message.payload_as().unwrap_or_default();
        let code = payload
            .code
            .as_deref()
            .and_then(|code| code.parse::<ErrorCode>().ok())
            .unwrap_or(ErrorCode::AnalysisFailed);
        let text = payload
            .error
            .unwrap_or_else(|| messages::DEFAULT_ERROR.to_string());
        self.apply(&message.session_id, AnalysisUpdate::failed(code, text));
    }
}

impl Drop for AnalysisInner {
    fn drop(&mut self) {
        for entry in self.pollers.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_body_carries_parameters() {
        let parameters = StartParameters {
            proposal_id: "p1".into(),
            document_id: "d1".into(),
            filename: "doc.pdf".into(),
            s3_key: document_storage_key("p1", "doc.pdf"),
            frameworks: vec!["FAR".into()],
            provider: Some("bedrock".into()),
        };
        let body = parameters.body();
        assert_eq!(body.s3_key, "uploads/p1/doc.pdf");
        assert_eq!(body.provider.as_deref(), Some("bedrock"));
        assert_eq!(body.frameworks, vec!["FAR".to_string()]);
    }
}
