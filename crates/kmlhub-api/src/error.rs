//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Anything that
//! converts into `AppError` becomes an `HttpAppError` through `?` and renders
//! with a consistent status, body and log line.

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kmlhub_core::{AppError, ErrorMetadata, LogLevel, ValidationError};
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    /// Suggested action for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorResponse {
    fn from_app_error(app_error: &AppError, with_details: bool) -> Self {
        Self {
            error: app_error.client_message(),
            details: with_details.then(|| app_error.detailed_message()),
            error_type: with_details.then(|| app_error.error_type().to_string()),
            code: app_error.error_code().to_string(),
            recoverable: app_error.is_recoverable(),
            suggested_action: app_error.suggested_action().map(String::from),
        }
    }
}

/// Wrapper type for AppError to implement IntoResponse
/// This is necessary because of Rust's orphan rules - we can't implement
/// IntoResponse (external trait) for AppError (external type from kmlhub-core)
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<ValidationError> for HttpAppError {
    fn from(err: ValidationError) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<validator::ValidationErrors> for HttpAppError {
    fn from(err: validator::ValidationErrors) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<MultipartError> for HttpAppError {
    fn from(err: MultipartError) -> Self {
        HttpAppError(AppError::InvalidInput(format!(
            "Invalid multipart body: {}",
            err.body_text()
        )))
    }
}

/// Convert JSON body deserialization failures into a 400 with our ErrorResponse format.
impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError(AppError::InvalidInput(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// JSON body extractor that deserializes and then runs the body's `Validate`
/// rules. Both failures render as our ErrorResponse format (400 + JSON).
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        inner.validate()?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| kmlhub_core::config::is_production_environment(&env))
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Details are hidden in production and for sensitive errors.
        let with_details = !is_production_env() && !app_error.is_sensitive();
        let body = ErrorResponse::from_app_error(app_error, with_details);

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_validation_error_too_large() {
        let HttpAppError(app_err) = ValidationError::TooLarge {
            size: 1000,
            max: 500,
        }
        .into();
        match app_err {
            AppError::PayloadTooLarge(msg) => {
                assert!(msg.contains("1000"));
                assert!(msg.contains("500"));
            }
            _ => panic!("Expected PayloadTooLarge variant"),
        }
    }

    #[test]
    fn test_from_validation_error_unsupported_type() {
        let HttpAppError(app_err) = ValidationError::UnsupportedType {
            file_name: "map.png".to_string(),
            allowed: vec!["kml".to_string(), "kmz".to_string()],
        }
        .into();
        assert_eq!(app_err.http_status_code(), 415);
    }

    #[test]
    fn test_upstream_status_is_preserved() {
        let response = HttpAppError(AppError::Upstream {
            status_code: 403,
            message: "signature expired".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response =
            HttpAppError(AppError::UpstreamUnavailable("connection refused".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_response_hides_details_for_sensitive_errors() {
        let err = AppError::Internal("secret path /var/lib".to_string());
        let body = ErrorResponse::from_app_error(&err, false);
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
        assert!(body.error_type.is_none());
    }

    /// Verifies the public error response contract: serialized ErrorResponse has "error",
    /// "code", "recoverable", and optionally "details" / "error_type" / "suggested_action".
    #[test]
    fn test_error_response_shape() {
        let err = AppError::MalformedUpstreamResponse("no presignedUrl".to_string());
        let json = serde_json::to_value(ErrorResponse::from_app_error(&err, true)).unwrap();
        assert_eq!(json["error"], "no presignedUrl");
        assert_eq!(json["code"], "MALFORMED_UPSTREAM_RESPONSE");
        assert_eq!(json["recoverable"], false);
        assert_eq!(json["error_type"], "MalformedUpstreamResponse");
        assert!(json["details"].as_str().unwrap().contains("no presignedUrl"));
    }

    fn json_request(body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_validated_json_runs_validation_rules() {
        use kmlhub_core::models::PresignedUrlRequest;

        let ok = ValidatedJson::<PresignedUrlRequest>::from_request(
            json_request(r#"{"fileName":"input_kml_files/a.kml"}"#),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(ok.0.file_name, "input_kml_files/a.kml");

        let HttpAppError(err) = ValidatedJson::<PresignedUrlRequest>::from_request(
            json_request(r#"{"fileName":""}"#),
            &(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.http_status_code(), 400);

        let HttpAppError(err) = ValidatedJson::<PresignedUrlRequest>::from_request(
            json_request(r#"{"name":"a.kml"}"#),
            &(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
