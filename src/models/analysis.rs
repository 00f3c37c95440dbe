use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize_progress, UploadFile};
use crate::error::{ErrorCode, StateMachineError};
use crate::state_machine::AnalysisStatus;

/// Caller input for starting an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub proposal_id: String,
    /// Previously uploaded document; required unless `file` is given
    pub document_id: Option<String>,
    /// Document to upload before the analysis starts
    pub file: Option<UploadFile>,
    pub filename: Option<String>,
    /// Frameworks to check against; empty means the configured defaults
    pub frameworks: Vec<String>,
    /// Preferred model provider, passed through to the backend
    pub provider: Option<String>,
}

impl AnalysisRequest {
    pub fn new(proposal_id: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            document_id: None,
            file: None,
            filename: None,
            frameworks: Vec::new(),
            provider: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_file(mut self, file: UploadFile) -> Self {
        self.filename.get_or_insert_with(|| file.filename.clone());
        self.file = Some(file);
        self
    }

    pub fn with_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

/// Body of `POST /api/analysis/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartAnalysisRequest {
    pub proposal_id: String,
    pub document_id: String,
    pub filename: String,
    pub s3_key: String,
    pub frameworks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Analysis session as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSessionResponse {
    pub id: String,
    #[serde(default, alias = "proposal_id")]
    pub proposal_id: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl AnalysisSessionResponse {
    /// Map the backend status. Unknown values are an error, never a default.
    pub fn parsed_status(&self) -> Result<AnalysisStatus, StateMachineError> {
        self.status.parse()
    }

    pub fn normalized_progress(&self) -> u8 {
        normalize_progress(self.progress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    pub proposal_id: String,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl AnalysisSession {
    /// Materialize a session from the start response.
    pub fn from_response(
        response: &AnalysisSessionResponse,
        proposal_id: &str,
    ) -> Result<Self, StateMachineError> {
        let status = response.parsed_status()?;
        let proposal_id = if response.proposal_id.is_empty() {
            proposal_id.to_string()
        } else {
            response.proposal_id.clone()
        };

        Ok(Self {
            id: response.id.clone(),
            proposal_id,
            status,
            progress: response.normalized_progress(),
            current_step: response
                .current_step
                .clone()
                .unwrap_or_else(|| status.default_step().to_string()),
            started_at: response.started_at.unwrap_or_else(Utc::now),
            completed_at: response.completed_at,
            estimated_completion: response.estimated_completion,
            error_message: response.error_message.clone(),
            error_code: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_response() {
        let response: AnalysisSessionResponse = serde_json::from_str(
            r#"{"id":"a1","proposalId":"p1","status":"extracting","progress":12.4,"currentStep":"Reading PDF"}"#,
        )
        .unwrap();

        let session = AnalysisSession::from_response(&response, "ignored").unwrap();
        assert_eq!(session.id, "a1");
        assert_eq!(session.proposal_id, "p1");
        assert_eq!(session.status, AnalysisStatus::Extracting);
        assert_eq!(session.progress, 12);
        assert_eq!(session.current_step, "Reading PDF");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let response: AnalysisSessionResponse =
            serde_json::from_str(r#"{"id":"a1","status":"paused"}"#).unwrap();
        assert_eq!(
            AnalysisSession::from_response(&response, "p1"),
            Err(StateMachineError::UnknownStatus("paused".into()))
        );
    }

    #[test]
    fn test_start_request_wire_shape() {
        let body = StartAnalysisRequest {
            proposal_id: "p1".into(),
            document_id: "d1".into(),
            filename: "doc.pdf".into(),
            s3_key: "uploads/p1/doc.pdf".into(),
            frameworks: vec!["FAR".into()],
            provider: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["proposal_id"], "p1");
        assert_eq!(value["s3_key"], "uploads/p1/doc.pdf");
        assert!(value.get("provider").is_none());
    }
}
