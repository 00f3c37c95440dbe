//! # Constants
//!
//! Endpoint paths, channel topics, cache lifetimes and validation limits shared by
//! the request engine, streaming client and orchestrators.

use std::time::Duration;

/// Backend REST endpoints
pub mod endpoints {
    pub const HEALTH: &str = "/api/health";
    pub const DOCUMENT_UPLOAD: &str = "/api/documents/upload";
    pub const ANALYSIS_START: &str = "/api/analysis/start";
    /// Path suffix of the streaming channel, appended to the websocket base URL
    pub const CHANNEL_PATH: &str = "/ws";

    pub fn upload_status(upload_id: &str) -> String {
        format!("/api/documents/upload/{upload_id}")
    }

    pub fn analysis(analysis_id: &str) -> String {
        format!("/api/analysis/{analysis_id}")
    }

    pub fn analysis_results(analysis_id: &str) -> String {
        format!("/api/analysis/{analysis_id}/results")
    }

    pub fn issue_details(issue_id: &str) -> String {
        format!("/api/results/issues/{issue_id}")
    }
}

/// Streaming channel message topics
pub mod topics {
    pub const UPLOAD_PROGRESS: &str = "upload_progress";
    pub const ANALYSIS_PROGRESS: &str = "analysis_progress";
    pub const ANALYSIS_COMPLETE: &str = "analysis_complete";
    pub const ERROR: &str = "error";
}

/// Cache keys and lifetimes for idempotent reads
pub mod cache {
    use super::Duration;

    pub const UPLOAD_STATUS_TTL: Duration = Duration::from_secs(30);
    pub const ANALYSIS_STATUS_TTL: Duration = Duration::from_secs(15);
    pub const RESULTS_TTL: Duration = Duration::from_secs(5 * 60);
    pub const ISSUE_DETAILS_TTL: Duration = Duration::from_secs(10 * 60);

    pub fn upload_status_key(upload_id: &str) -> String {
        format!("upload-status:{upload_id}")
    }

    pub fn analysis_status_key(analysis_id: &str) -> String {
        format!("analysis-status:{analysis_id}")
    }

    pub fn results_key(analysis_id: &str) -> String {
        format!("analysis-results:{analysis_id}")
    }

    pub fn issue_key(issue_id: &str) -> String {
        format!("issue-details:{issue_id}")
    }
}

/// Regulatory frameworks the backend can analyze against
pub mod frameworks {
    pub const FAR: &str = "FAR";
    pub const DFARS: &str = "DFARS";
    pub const SUPPORTED: &[&str] = &[FAR, DFARS];
}

/// Messages surfaced on sessions and validation failures
pub mod messages {
    pub const ANALYSIS_TIMEOUT: &str = "Analysis timeout";
    pub const ANALYSIS_CANCELLED_STEP: &str = "Analysis cancelled";
    pub const ANALYSIS_CANCELLED: &str = "Analysis cancelled by user";
    pub const UPLOAD_CANCELLED: &str = "Upload cancelled by user";
    pub const DEFAULT_ERROR: &str = "An unexpected error occurred. Please try again.";
    pub const SERVICE_NOT_READY: &str =
        "Analysis service is not available. Please try again later.";
}

/// Fallback filename when a start request carries none
pub const DEFAULT_DOCUMENT_FILENAME: &str = "document.pdf";

/// Multipart form field carrying the uploaded file
pub const UPLOAD_FORM_FIELD: &str = "file";

/// Requests slower than this are logged as slow by default
pub const DEFAULT_SLOW_REQUEST_THRESHOLD_MS: u64 = 1_000;

/// Storage key for the uploaded document of a proposal.
pub fn document_storage_key(proposal_id: &str, filename: &str) -> String {
    format!("uploads/{proposal_id}/{filename}")
}
