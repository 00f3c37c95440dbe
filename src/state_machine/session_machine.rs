//! Applying observed updates to session records.
//!
//! Every update, whether it came from a poll response, a channel message or a
//! local decision (timeout, cancel), goes through `apply`. An update that
//! changes nothing yields `None`; anything else yields exactly one
//! [`AppliedChange`] for the orchestrator to publish.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::transitions::{evaluate_transition, merge_progress, TransitionDecision};
use super::{AnalysisStatus, UploadStatus};
use crate::error::ErrorCode;
use crate::models::{AnalysisSession, UploadSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedChange {
    Progress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisUpdate {
    pub status: Option<AnalysisStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub error: Option<(ErrorCode, String)>,
}

impl AnalysisUpdate {
    pub fn progress(progress: u8, current_step: Option<String>) -> Self {
        Self {
            progress: Some(progress),
            current_step,
            ..Self::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(AnalysisStatus::Completed),
            progress: Some(100),
            ..Self::default()
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(AnalysisStatus::Failed),
            error: Some((code, message.into())),
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadUpdate {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub s3_key: Option<String>,
    pub error: Option<(ErrorCode, String)>,
}

impl UploadUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(s3_key: Option<String>) -> Self {
        Self {
            status: Some(UploadStatus::Completed),
            progress: Some(100),
            s3_key,
            ..Self::default()
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Failed),
            error: Some((code, message.into())),
            ..Self::default()
        }
    }
}

impl AnalysisSession {
    pub fn apply(&mut self, update: AnalysisUpdate) -> Option<AppliedChange> {
        let target = update.status.unwrap_or(self.status);
        let decision = evaluate_transition(self.status, target);
        if decision == TransitionDecision::IgnoreTerminal {
            debug!(session_id = %self.id, status = %self.status, "Ignoring update for terminal analysis session");
            return None;
        }

        let next_status = if decision == TransitionDecision::Advance {
            target
        } else {
            self.status
        };
        if decision == TransitionDecision::IgnoreRegression {
            debug!(session_id = %self.id, current = %self.status, observed = %target, "Ignoring status regression");
        }
        if let Some(observed) = update.progress {
            if observed < self.progress {
                debug!(session_id = %self.id, current = self.progress, observed, "Clamping progress regression");
            }
        }

        let completed = next_status == AnalysisStatus::Completed;
        let next_progress = merge_progress(self.progress, update.progress, completed);
        let next_step = match (&update.current_step, decision) {
            (Some(step), TransitionDecision::Advance | TransitionDecision::Stay) => step.clone(),
            (None, TransitionDecision::Advance) => next_status.default_step().to_string(),
            _ => self.current_step.clone(),
        };

        let changed = next_status != self.status
            || next_progress != self.progress
            || next_step != self.current_step;
        if !changed {
            return None;
        }

        self.status = next_status;
        self.progress = next_progress;
        self.current_step = next_step;
        if update.estimated_completion.is_some() {
            self.estimated_completion = update.estimated_completion;
        }

        match next_status {
            AnalysisStatus::Completed => {
                self.completed_at = Some(Utc::now());
                Some(AppliedChange::Completed)
            }
            AnalysisStatus::Failed => {
                let (code, message) = update.error.unwrap_or((
                    ErrorCode::AnalysisFailed,
                    crate::constants::messages::DEFAULT_ERROR.to_string(),
                ));
                self.completed_at = Some(Utc::now());
                self.error_code = Some(code);
                self.error_message = Some(message);
                Some(AppliedChange::Failed)
            }
            _ => Some(AppliedChange::Progress),
        }
    }
}

impl UploadSession {
    pub fn apply(&mut self, update: UploadUpdate) -> Option<AppliedChange> {
        let target = update.status.unwrap_or(self.status);
        let decision = evaluate_transition(self.status, target);
        if decision == TransitionDecision::IgnoreTerminal {
            debug!(session_id = %self.id, status = %self.status, "Ignoring update for terminal upload session");
            return None;
        }

        let next_status = if decision == TransitionDecision::Advance {
            target
        } else {
            self.status
        };
        let completed = next_status == UploadStatus::Completed;
        let next_progress = merge_progress(self.progress, update.progress, completed);

        let new_key = update.s3_key.is_some() && update.s3_key != self.s3_key;
        if next_status == self.status && next_progress == self.progress && !new_key {
            return None;
        }

        self.status = next_status;
        self.progress = next_progress;
        if new_key {
            self.s3_key = update.s3_key;
        }

        match next_status {
            UploadStatus::Completed => {
                self.completed_at = Some(Utc::now());
                Some(AppliedChange::Completed)
            }
            UploadStatus::Failed => {
                let (code, message) = update.error.unwrap_or((
                    ErrorCode::UploadFailed,
                    crate::constants::messages::DEFAULT_ERROR.to_string(),
                ));
                self.completed_at = Some(Utc::now());
                self.error_code = Some(code);
                self.error_message = Some(message);
                Some(AppliedChange::Failed)
            }
            _ => Some(AppliedChange::Progress),
        }
    }
}
