use crate::error::ErrorCode;
use crate::models::{AnalysisSession, UploadSession};
use crate::state_machine::AppliedChange;

/// Notification emitted once per applied analysis transition.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Progress(AnalysisSession),
    Completed(AnalysisSession),
    Failed {
        session: AnalysisSession,
        code: ErrorCode,
        message: String,
    },
}

impl AnalysisEvent {
    pub fn from_change(change: AppliedChange, session: AnalysisSession) -> Self {
        match change {
            AppliedChange::Progress => Self::Progress(session),
            AppliedChange::Completed => Self::Completed(session),
            AppliedChange::Failed => {
                let code = session.error_code.unwrap_or(ErrorCode::AnalysisFailed);
                let message = session.error_message.clone().unwrap_or_default();
                Self::Failed {
                    session,
                    code,
                    message,
                }
            }
        }
    }

    pub fn session(&self) -> &AnalysisSession {
        match self {
            Self::Progress(session) | Self::Completed(session) => session,
            Self::Failed { session, .. } => session,
        }
    }
}

/// Notification emitted once per applied upload transition.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Progress(UploadSession),
    /// `previous_id` carries the client-generated id when the backend assigned
    /// a different canonical one; the old id is no longer tracked.
    Completed {
        session: UploadSession,
        previous_id: Option<String>,
    },
    Failed {
        session: UploadSession,
        code: ErrorCode,
        message: String,
    },
}

impl UploadEvent {
    pub fn from_change(change: AppliedChange, session: UploadSession, previous_id: Option<String>) -> Self {
        match change {
            AppliedChange::Progress => Self::Progress(session),
            AppliedChange::Completed => Self::Completed {
                session,
                previous_id,
            },
            AppliedChange::Failed => {
                let code = session.error_code.unwrap_or(ErrorCode::UploadFailed);
                let message = session.error_message.clone().unwrap_or_default();
                Self::Failed {
                    session,
                    code,
                    message,
                }
            }
        }
    }

    pub fn session(&self) -> &UploadSession {
        match self {
            Self::Progress(session) => session,
            Self::Completed { session, .. } | Self::Failed { session, .. } => session,
        }
    }
}
