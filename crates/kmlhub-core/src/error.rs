//! Error types module
//!
//! Service-side errors are unified under [`AppError`]. Each variant describes
//! how it should be presented over HTTP through the [`ErrorMetadata`] trait,
//! so the API layer renders status, body and log level from one place.
//!
//! The client pipeline uses its own per-stage error enums (see the
//! `kmlhub-client` crate); [`crate::validation::ValidationError`] is shared.

use std::io;

use crate::validation::ValidationError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for upstream hiccups the caller may retry
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "UPSTREAM_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Upstream responded with status {status_code}: {message}")]
    Upstream { status_code: u16, message: String },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            ValidationError::UnsupportedType { .. } => {
                AppError::UnsupportedMediaType(err.to_string())
            }
        }
    }
}

/// Upstream statuses are passed through when they are client or server
/// errors; anything else (a 1xx/3xx surprise) becomes a 502.
fn upstream_status(status_code: u16) -> u16 {
    if (400..=599).contains(&status_code) {
        status_code
    } else {
        502
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Check the request path"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size below the upload limit"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedMediaType(_) => (
            415,
            "UNSUPPORTED_MEDIA_TYPE",
            false,
            Some("Upload a .kml or .kmz file"),
            false,
            LogLevel::Debug,
        ),
        AppError::Upstream { status_code, .. } => (
            upstream_status(*status_code),
            "UPSTREAM_ERROR",
            *status_code >= 500,
            Some("Retry after a short delay"),
            false,
            LogLevel::Warn,
        ),
        AppError::UpstreamUnavailable(_) => (
            502,
            "UPSTREAM_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Warn,
        ),
        AppError::MalformedUpstreamResponse(_) => (
            502,
            "MALFORMED_UPSTREAM_RESPONSE",
            false,
            Some("Contact support if this error persists"),
            false,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Request new upload credentials and retry"),
            false,
            LogLevel::Error,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            AppError::Upstream { .. } => "Upstream",
            AppError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            AppError::MalformedUpstreamResponse(_) => "MalformedUpstreamResponse",
            AppError::Storage(_) => "Storage",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::UnsupportedMediaType(ref msg) => msg.clone(),
            AppError::Upstream {
                status_code,
                message,
            } => {
                if message.is_empty() {
                    format!("Upstream service responded with status {}", status_code)
                } else {
                    message.clone()
                }
            }
            AppError::UpstreamUnavailable(_) => "Upstream service unavailable".to_string(),
            AppError::MalformedUpstreamResponse(ref msg) => msg.clone(),
            AppError::Storage(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_invalid_input() {
        let err = AppError::InvalidInput("fileName is required".to_string());
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "fileName is required");
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_upstream_passes_status_through() {
        let err = AppError::Upstream {
            status_code: 403,
            message: "Forbidden".to_string(),
        };
        assert_eq!(err.http_status_code(), 403);
        assert!(!err.is_recoverable());

        let err = AppError::Upstream {
            status_code: 503,
            message: String::new(),
        };
        assert_eq!(err.http_status_code(), 503);
        assert!(err.is_recoverable());
        assert!(err.client_message().contains("503"));

        let err = AppError::Upstream {
            status_code: 302,
            message: String::new(),
        };
        assert_eq!(err.http_status_code(), 502);
    }

    #[test]
    fn test_error_metadata_upstream_unavailable_is_sensitive() {
        let err = AppError::UpstreamUnavailable("connect refused 10.0.0.5:443".to_string());
        assert_eq!(err.http_status_code(), 502);
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Upstream service unavailable");
    }

    #[test]
    fn test_error_metadata_storage() {
        let err = AppError::Storage("Upload failed with status 403".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert_eq!(err.client_message(), "Upload failed with status 403");
    }

    #[test]
    fn test_from_validation_error() {
        let err: AppError = ValidationError::TooLarge { size: 10, max: 5 }.into();
        assert_eq!(err.http_status_code(), 413);

        let err: AppError = ValidationError::UnsupportedType {
            file_name: "map.png".to_string(),
            allowed: vec!["kml".to_string()],
        }
        .into();
        assert_eq!(err.http_status_code(), 415);
        assert!(err.client_message().contains("map.png"));
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let source = anyhow::anyhow!("socket closed").context("relay failed");
        let err = AppError::from(source);
        let details = err.detailed_message();
        assert!(details.contains("Caused by"));
    }
}
