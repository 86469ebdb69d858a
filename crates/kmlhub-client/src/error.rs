//! Typed failures for each pipeline stage.
//!
//! Every stage returns its own error; [`UploadError`] wraps them for the
//! orchestrator. None of them is retried automatically.

use std::time::Duration;

use kmlhub_core::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Unsupported media type for {file_name}: {mime_type}")]
    UnsupportedMediaType { file_name: String, mime_type: String },

    #[error("Credential request failed with status {status_code}: {message}")]
    UpstreamError { status_code: u16, message: String },

    #[error("Malformed credential response: {0}")]
    MalformedResponse(String),

    #[error("Network error while requesting credentials: {0}")]
    Network(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Upload timed out after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Network error during upload: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Storage responded with status {status_code}: {message}")]
    UpstreamError { status_code: u16, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Processing trigger timed out")]
    Timeout,

    #[error("Processing trigger rejected the file with status {status_code}: {message}")]
    Rejected { status_code: u16, message: String },

    #[error("Network error while triggering processing: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Malformed processing trigger response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Status check failed with status {status_code}: {message}")]
    Rejected { status_code: u16, message: String },

    #[error("Network error while checking status: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Malformed status response: {0}")]
    MalformedResponse(String),
}

/// Failure surfaced by the upload orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("An upload is already in progress")]
    ConcurrentUpload,

    #[error("Cannot {action} while {state}; reset first")]
    InvalidState { action: &'static str, state: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_messages_are_readable() {
        let err = UploadError::from(ValidationError::UnsupportedType {
            file_name: "map.png".to_string(),
            allowed: vec!["kml".to_string(), "kmz".to_string()],
        });
        assert!(err.to_string().starts_with("Unsupported file type: map.png"));

        let err = UploadError::from(TransferError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.to_string(), "Upload timed out after 30 seconds");

        let err = UploadError::InvalidState {
            action: "select a file",
            state: "success".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot select a file while success; reset first");
    }

    #[test]
    fn test_upstream_error_carries_status() {
        let err = CredentialError::UpstreamError {
            status_code: 403,
            message: "expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Credential request failed with status 403: expired"
        );
    }
}
