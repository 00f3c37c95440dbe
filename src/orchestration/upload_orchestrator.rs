//! # Upload Orchestrator
//!
//! Tracks document uploads from the first byte to the backend's
//! acknowledgement. A session starts under a client-generated id
//! (`upload_<millis>_<8 hex>`) and is re-keyed when the backend answers with
//! its own canonical id; the client id is then dropped and reported once, as
//! `previous_id` on the completion event.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use super::ChannelAttachment;
use crate::client::{AnalysisApiClient, ReadPolicy};
use crate::config::UploadConfig;
use crate::constants::{messages, topics};
use crate::error::{ErrorCode, RequestError, SessionError, SessionResult};
use crate::events::{ObserverHandle, ObserverRegistry, SessionObserver, UploadEvent, DEFAULT_EVENT_CAPACITY};
use crate::logging::log_session_transition;
use crate::models::{UploadFile, UploadSession, UploadSessionResponse};
use crate::state_machine::{AppliedChange, UploadStatus, UploadUpdate};
use crate::streaming::{ChannelMessage, ProgressPayload, StreamingClient};
use crate::transport::ProgressSink;
use crate::validation::validate_upload_file;

struct UploadRecord {
    session: UploadSession,
    /// Terminal state confirmed against the backend
    reconciled: bool,
    cancel: Arc<Notify>,
}

struct UploadInner {
    api: AnalysisApiClient,
    config: UploadConfig,
    sessions: DashMap<String, UploadRecord>,
    observers: ObserverRegistry<UploadEvent>,
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<UploadInner>,
}

impl std::fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("sessions", &self.inner.sessions.len())
            .field("observers", &self.inner.observers)
            .finish()
    }
}

/// Client-side id for a new upload.
pub fn generate_upload_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("upload_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

impl UploadOrchestrator {
    pub fn new(api: AnalysisApiClient, config: UploadConfig) -> Self {
        Self {
            inner: Arc::new(UploadInner {
                api,
                config,
                sessions: DashMap::new(),
                observers: ObserverRegistry::new(DEFAULT_EVENT_CAPACITY),
            }),
        }
    }

    /// Validate and upload a document. Resolves with the session under its
    /// canonical id once the backend has acknowledged the file.
    #[instrument(skip(self, file), fields(filename = %file.filename, bytes = file.size()))]
    pub async fn upload_document(&self, file: UploadFile) -> SessionResult<UploadSession> {
        validate_upload_file(&file, &self.inner.config)?;

        let client_id = generate_upload_id();
        let cancel = Arc::new(Notify::new());
        self.inner.sessions.insert(
            client_id.clone(),
            UploadRecord {
                session: UploadSession::new(&client_id, &file),
                reconciled: false,
                cancel: Arc::clone(&cancel),
            },
        );
        info!(upload_id = %client_id, "Upload started");

        let progress = self.progress_sink(&client_id);
        let result = tokio::select! {
            result = self.inner.api.upload_document(file, progress) => result,
            _ = cancel.notified() => {
                debug!(upload_id = %client_id, "Upload aborted by cancel");
                return Err(self.cancelled_error(&client_id));
            }
        };

        match result {
            Ok(response) => self.complete(&client_id, response),
            Err(e) => {
                warn!(upload_id = %client_id, code = %e.code, error = %e.message, "Upload failed");
                self.inner
                    .apply(&client_id, UploadUpdate::failed(e.code, e.message.clone()));
                Err(SessionError::Request(e))
            }
        }
    }

    /// Local copy for active sessions; a terminal session is confirmed
    /// against the backend once, then served locally.
    pub async fn get_upload_status(&self, upload_id: &str) -> SessionResult<UploadSession> {
        let (session, needs_reconcile) = match self.inner.sessions.get(upload_id) {
            Some(record) => (
                Some(record.session.clone()),
                record.session.is_terminal() && !record.reconciled,
            ),
            None => (None, true),
        };

        if let Some(session) = &session {
            if !needs_reconcile {
                return Ok(session.clone());
            }
        }

        let policy = if session.is_some() {
            ReadPolicy::Fresh
        } else {
            ReadPolicy::Cached
        };
        match self.inner.api.get_upload_status(upload_id, policy).await {
            Ok(response) => match session {
                Some(_) => self.inner.reconcile(upload_id, &response),
                None => session_from_response(upload_id, &response),
            },
            Err(e) => match session {
                Some(session) => {
                    debug!(upload_id, error = %e, "Status refresh failed; serving last known state");
                    Ok(session)
                }
                None => Err(SessionError::Request(e)),
            },
        }
    }

    /// Cancel an upload that is still sending bytes.
    pub fn cancel_upload(&self, upload_id: &str) -> SessionResult<UploadSession> {
        let cancel = {
            let record = self
                .inner
                .sessions
                .get(upload_id)
                .ok_or_else(|| SessionError::not_found(upload_id))?;
            if record.session.status != UploadStatus::Uploading {
                return Err(SessionError::InvalidState {
                    session_id: upload_id.to_string(),
                    status: record.session.status.to_string(),
                });
            }
            Arc::clone(&record.cancel)
        };

        self.inner.apply(
            upload_id,
            UploadUpdate::failed(ErrorCode::UploadFailed, messages::UPLOAD_CANCELLED),
        );
        cancel.notify_one();
        info!(upload_id, "Upload cancelled");
        self.session(upload_id)
            .ok_or_else(|| SessionError::not_found(upload_id))
    }

    pub fn session(&self, upload_id: &str) -> Option<UploadSession> {
        self.inner
            .sessions
            .get(upload_id)
            .map(|record| record.session.clone())
    }

    pub fn active_sessions(&self) -> Vec<UploadSession> {
        self.inner
            .sessions
            .iter()
            .filter(|record| !record.session.is_terminal())
            .map(|record| record.session.clone())
            .collect()
    }

    /// Forget a finished session. Active sessions are kept.
    pub fn clear_session(&self, upload_id: &str) -> bool {
        self.inner
            .sessions
            .remove_if(upload_id, |_, record| record.session.is_terminal())
            .is_some()
    }

    pub fn clear_all_sessions(&self) {
        self.inner.sessions.clear();
    }

    pub fn register_observer(&self, observer: Arc<dyn SessionObserver<UploadEvent>>) -> ObserverHandle {
        self.inner.observers.register(observer)
    }

    pub fn on_event<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&UploadEvent) + Send + Sync + 'static,
    {
        self.inner.observers.register_fn(observer)
    }

    pub fn remove_observer(&self, handle: ObserverHandle) -> bool {
        self.inner.observers.remove(handle)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<UploadEvent> {
        self.inner.observers.subscribe()
    }

    /// Apply `upload_progress` pushes to known sessions.
    pub fn attach_channel(&self, channel: &StreamingClient) -> ChannelAttachment {
        let mut attachment = ChannelAttachment::new(channel);
        let weak = Arc::downgrade(&self.inner);
        let id = channel.subscribe_fn(topics::UPLOAD_PROGRESS, move |message| {
            handle_progress_message(&weak, message)
        });
        attachment.push(topics::UPLOAD_PROGRESS, id);
        attachment
    }

    fn progress_sink(&self, upload_id: &str) -> ProgressSink {
        let weak = Arc::downgrade(&self.inner);
        let upload_id = upload_id.to_string();
        Arc::new(move |percent| {
            if let Some(inner) = weak.upgrade() {
                inner.apply(&upload_id, UploadUpdate::progress(percent));
            }
        })
    }

    fn cancelled_error(&self, upload_id: &str) -> SessionError {
        let message = self
            .session(upload_id)
            .and_then(|session| session.error_message)
            .unwrap_or_else(|| messages::UPLOAD_CANCELLED.to_string());
        SessionError::Request(RequestError::new(ErrorCode::UploadFailed, message))
    }

    /// Re-key under the canonical id and mark completed.
    fn complete(&self, client_id: &str, response: UploadSessionResponse) -> SessionResult<UploadSession> {
        let canonical_id = response.canonical_id().unwrap_or(client_id).to_string();

        let Some((_, mut record)) = self.inner.sessions.remove(client_id) else {
            return Err(SessionError::not_found(client_id));
        };
        if record.session.is_terminal() {
            // Cancelled while the response was in flight
            let error = self.cancelled_error_from(&record.session);
            self.inner.sessions.insert(client_id.to_string(), record);
            return Err(error);
        }

        let from = record.session.status;
        let change = record
            .session
            .apply(UploadUpdate::completed(response.s3_key.clone()));
        record.session.id = canonical_id.clone();
        let session = record.session.clone();
        self.inner.sessions.insert(canonical_id.clone(), record);

        let previous_id = (canonical_id != client_id).then(|| client_id.to_string());
        if let Some(previous) = &previous_id {
            info!(upload_id = %canonical_id, previous_id = %previous, "Upload re-keyed to backend id");
        }
        if let Some(change) = change {
            log_session_transition("upload", &canonical_id, &from.to_string(), &session.status.to_string(), session.progress);
            self.inner
                .observers
                .notify(UploadEvent::from_change(change, session.clone(), previous_id));
        }
        Ok(session)
    }

    fn cancelled_error_from(&self, session: &UploadSession) -> SessionError {
        SessionError::Request(RequestError::new(
            session.error_code.unwrap_or(ErrorCode::UploadFailed),
            session
                .error_message
                .clone()
                .unwrap_or_else(|| messages::UPLOAD_CANCELLED.to_string()),
        ))
    }
}

impl UploadInner {
    fn apply(&self, upload_id: &str, update: UploadUpdate) -> Option<AppliedChange> {
        let (change, session, from) = {
            let mut record = self.sessions.get_mut(upload_id)?;
            let from = record.session.status;
            let change = record.session.apply(update)?;
            (change, record.session.clone(), from)
        };

        if change != AppliedChange::Progress || from != session.status {
            log_session_transition("upload", upload_id, &from.to_string(), &session.status.to_string(), session.progress);
        }
        self.observers
            .notify(UploadEvent::from_change(change, session, None));
        Some(change)
    }

    fn reconcile(&self, upload_id: &str, response: &UploadSessionResponse) -> SessionResult<UploadSession> {
        let Some(mut record) = self.sessions.get_mut(upload_id) else {
            return session_from_response(upload_id, response);
        };
        if record.session.s3_key.is_none() {
            record.session.s3_key = response.s3_key.clone();
        }
        if let Some(completed_at) = response.completed_at {
            record.session.completed_at = Some(completed_at);
        }
        record.reconciled = true;
        Ok(record.session.clone())
    }
}

fn handle_progress_message(inner: &Weak<UploadInner>, message: &ChannelMessage) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if !inner.sessions.contains_key(&message.session_id) {
        return;
    }

    let payload: ProgressPayload = match message.payload_as() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(upload_id = %message.session_id, error = %e, "Malformed upload progress payload");
            return;
        }
    };
    let status = match payload.status.as_deref().map(str::parse::<UploadStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            warn!(upload_id = %message.session_id, error = %e, "Ignoring unknown upload status");
            None
        }
        None => None,
    };

    inner.apply(
        &message.session_id,
        UploadUpdate {
            status,
            progress: payload.normalized_progress(),
            ..UploadUpdate::default()
        },
    );
}

fn session_from_response(upload_id: &str, response: &UploadSessionResponse) -> SessionResult<UploadSession> {
    let status = match response.status.as_deref() {
        Some(status) => status.parse::<UploadStatus>()?,
        None => UploadStatus::Pending,
    };
    Ok(UploadSession {
        id: response.canonical_id().unwrap_or(upload_id).to_string(),
        filename: response.filename.clone().unwrap_or_default(),
        file_size: response.file_size.unwrap_or_default(),
        mime_type: response.mime_type.clone().unwrap_or_default(),
        status,
        progress: response
            .progress
            .map(crate::models::normalize_progress)
            .unwrap_or_default(),
        started_at: response.started_at.unwrap_or_else(Utc::now),
        completed_at: response.completed_at,
        error_message: response.error_message.clone(),
        error_code: status.is_failure().then_some(ErrorCode::UploadFailed),
        s3_key: response.s3_key.clone(),
    })
}
