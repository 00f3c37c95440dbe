//! # Data Models
//!
//! Wire DTOs exchanged with the backend and the session records owned by the
//! orchestrators. Wire types accept the backend's camelCase names and tolerate
//! missing optional fields.

pub mod analysis;
pub mod health;
pub mod results;
pub mod upload;

pub use analysis::{AnalysisRequest, AnalysisSession, AnalysisSessionResponse, StartAnalysisRequest};
pub use health::{HealthResponse, HealthState, ServiceStatus};
pub use results::{
    ComplianceIssue, ComplianceResults, Framework, IssueLocation, IssueSeverity, Regulation,
    ResultStatus, ResultsSummary,
};
pub use upload::{UploadFile, UploadSession, UploadSessionResponse};

/// Clamp a reported progress figure into a whole percentage.
pub fn normalize_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
