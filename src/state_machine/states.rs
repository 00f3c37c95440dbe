use serde::{Deserialize, Serialize};
use std::fmt;

use super::transitions::LifecycleState;
use crate::error::StateMachineError;

/// Analysis lifecycle as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Accepted, waiting for a worker
    Queued,
    /// Pulling text out of the document
    Extracting,
    /// Checking the text against the selected frameworks
    Analyzing,
    /// Cross-checking findings before publishing results
    Validating,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Step label used when the backend does not provide one.
    pub fn default_step(&self) -> &'static str {
        match self {
            Self::Queued => "Queued for analysis",
            Self::Extracting => "Extracting document text",
            Self::Analyzing => "Analyzing compliance",
            Self::Validating => "Validating results",
            Self::Completed => "Analysis complete",
            Self::Failed => "Analysis failed",
        }
    }
}

impl LifecycleState for AnalysisStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Extracting => 1,
            Self::Analyzing => 2,
            Self::Validating => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    fn is_terminal(&self) -> bool {
        AnalysisStatus::is_terminal(self)
    }

    fn is_failure(&self) -> bool {
        AnalysisStatus::is_failure(self)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Extracting => write!(f, "extracting"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Validating => write!(f, "validating"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "extracting" => Ok(Self::Extracting),
            "analyzing" => Ok(Self::Analyzing),
            "validating" => Ok(Self::Validating),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StateMachineError::UnknownStatus(s.to_string())),
        }
    }
}

/// Upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    /// Bytes are in flight
    Uploading,
    /// Stored; the backend is post-processing the document
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl LifecycleState for UploadStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Uploading => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    fn is_terminal(&self) -> bool {
        UploadStatus::is_terminal(self)
    }

    fn is_failure(&self) -> bool {
        UploadStatus::is_failure(self)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Uploading => write!(f, "uploading"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StateMachineError::UnknownStatus(s.to_string())),
        }
    }
}
