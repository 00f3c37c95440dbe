//! # Input Validation
//!
//! Checks run before anything touches the network. A failure here becomes a
//! `VALIDATION_FAILED` session error and no request is sent.

use crate::config::{AnalysisConfig, UploadConfig};
use crate::constants::frameworks;
use crate::error::{SessionError, SessionResult};
use crate::models::{AnalysisRequest, UploadFile};

/// Validate a document against the upload limits.
pub fn validate_upload_file(file: &UploadFile, config: &UploadConfig) -> SessionResult<()> {
    if !config
        .accepted_types
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(&file.mime_type))
    {
        return Err(SessionError::validation("Only PDF files are accepted for upload."));
    }

    let size = file.size();
    if size > config.max_file_size {
        return Err(SessionError::validation(format!(
            "File size exceeds the maximum limit of {}MB.",
            config.max_file_size / (1024 * 1024)
        )));
    }
    if size < config.min_file_size {
        return Err(SessionError::validation(
            "File is too small. Please select a valid PDF document.",
        ));
    }

    if file.filename.trim().is_empty() {
        return Err(SessionError::validation("Filename is required."));
    }
    if file.filename.chars().count() > config.max_filename_length {
        return Err(SessionError::validation(format!(
            "Filename is too long. Maximum {} characters allowed.",
            config.max_filename_length
        )));
    }

    Ok(())
}

/// Validate an analysis start request.
pub fn validate_analysis_request(request: &AnalysisRequest, config: &AnalysisConfig) -> SessionResult<()> {
    let proposal_id = request.proposal_id.trim();
    if proposal_id.is_empty() {
        return Err(SessionError::validation("Proposal ID is required"));
    }
    if proposal_id.chars().count() > config.max_proposal_id_length {
        return Err(SessionError::validation(format!(
            "Proposal ID must be at most {} characters",
            config.max_proposal_id_length
        )));
    }

    if let Some(unsupported) = request
        .frameworks
        .iter()
        .find(|framework| !frameworks::SUPPORTED.contains(&framework.as_str()))
    {
        return Err(SessionError::validation(format!(
            "Unsupported framework: {unsupported}. Supported frameworks: {}",
            frameworks::SUPPORTED.join(", ")
        )));
    }

    let has_document = request
        .document_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());
    if !has_document && request.file.is_none() {
        return Err(SessionError::validation(
            "A document ID or a file to upload is required",
        ));
    }

    Ok(())
}
