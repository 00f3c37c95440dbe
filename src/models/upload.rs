use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ErrorCode;
use crate::state_machine::UploadStatus;

/// A document held in memory, ready to be sent as multipart form data.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(filename, mime_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Upload session as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSessionResponse {
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub filename: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub s3_key: Option<String>,
}

impl UploadSessionResponse {
    /// The backend's id for the session; older deployments call it `sessionId`.
    pub fn canonical_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.session_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
    /// Storage key assigned by the backend once the file is stored
    pub s3_key: Option<String>,
}

impl UploadSession {
    pub fn new(id: impl Into<String>, file: &UploadFile) -> Self {
        Self {
            id: id.into(),
            filename: file.filename.clone(),
            file_size: file.size(),
            mime_type: file.mime_type.clone(),
            status: UploadStatus::Uploading,
            progress: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            error_code: None,
            s3_key: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
