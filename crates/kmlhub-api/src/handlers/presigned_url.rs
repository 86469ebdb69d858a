use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use kmlhub_core::keys::{base_file_name, file_key_from_url, namespaced_file_name};
use kmlhub_core::models::{
    IssuerPresignResponse, PresignedUrlRequest, PresignedUrlResponse, UploadRequest,
};
use kmlhub_core::validation::mime_type_for;
use kmlhub_core::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Expiry reported when the issuer does not send one.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Obtain a presigned URL for uploading a KML/KMZ file
#[utoipa::path(
    post,
    path = "/api/presigned-url",
    tag = "uploads",
    request_body = PresignedUrlRequest,
    responses(
        (status = 200, description = "Presigned URL issued", body = PresignedUrlResponse),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 415, description = "Not a .kml or .kmz file", body = ErrorResponse),
        (status = 502, description = "Credential issuer unreachable or malformed response", body = ErrorResponse)
    )
)]
#[tracing::instrument(
    skip(state, request),
    fields(file_name = %request.file_name, operation = "presigned_url")
)]
pub async fn create_presigned_url(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<PresignedUrlRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    // Size is unknown here; only the extension is checked.
    let base_name = base_file_name(&request.file_name);
    state
        .config
        .validator()
        .validate(&UploadRequest::new(base_name, mime_type_for(base_name), 0))?;

    let file_name = namespaced_file_name(&request.file_name);
    let issued = request_upstream(&state, &file_name).await?;

    let response = match issued.transfer_url() {
        Some(presigned_url) => PresignedUrlResponse {
            file_key: issued
                .storage_key()
                .or_else(|| file_key_from_url(&presigned_url))
                .unwrap_or_else(|| file_name.clone()),
            presigned_url,
            expires_in: issued.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            fields: issued.fields,
        },
        None => match state.config.fallback_store_url() {
            Some(store_url) if state.config.presign_fallback_enabled() => {
                tracing::warn!(
                    file_key = %file_name,
                    "Issuer response has no presignedUrl, returning fallback credentials"
                );
                fallback_credentials(store_url, &file_name)
            }
            _ => {
                return Err(AppError::MalformedUpstreamResponse(
                    "Credential issuer response has no presignedUrl".to_string(),
                )
                .into())
            }
        },
    };

    tracing::info!(
        file_key = %response.file_key,
        expires_in = response.expires_in,
        "Presigned URL issued"
    );

    Ok(Json(response))
}

async fn request_upstream(
    state: &AppState,
    file_name: &str,
) -> Result<IssuerPresignResponse, AppError> {
    let upstream_url = state.config.upstream_presign_url();
    let response = state
        .http_client
        .post(upstream_url)
        .json(&PresignedUrlRequest {
            file_name: file_name.to_string(),
        })
        .send()
        .await
        .map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to reach credential issuer: {}", e))
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(text);
        return Err(AppError::Upstream {
            status_code: status.as_u16(),
            message,
        });
    }

    response.json::<IssuerPresignResponse>().await.map_err(|e| {
        AppError::MalformedUpstreamResponse(format!(
            "Credential issuer returned an unreadable body: {}",
            e
        ))
    })
}

/// Locally built credentials pointing at the configured fallback store.
fn fallback_credentials(store_url: &str, file_key: &str) -> PresignedUrlResponse {
    let mut fields = BTreeMap::new();
    fields.insert(
        "original-name".to_string(),
        base_file_name(file_key).to_string(),
    );
    fields.insert(
        "upload-timestamp".to_string(),
        Utc::now().timestamp_millis().to_string(),
    );
    fields.insert("fallback".to_string(), "true".to_string());

    PresignedUrlResponse {
        presigned_url: format!(
            "{}/{}?X-Fallback-Signature={}",
            store_url.trim_end_matches('/'),
            file_key,
            Uuid::new_v4().simple()
        ),
        file_key: file_key.to_string(),
        expires_in: DEFAULT_EXPIRES_IN_SECS,
        fields: Some(fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_credentials_point_at_store() {
        let creds = fallback_credentials("https://store.example/bucket/", "input_kml_files/a.kml");
        assert!(creds
            .presigned_url
            .starts_with("https://store.example/bucket/input_kml_files/a.kml?X-Fallback-Signature="));
        assert_eq!(creds.file_key, "input_kml_files/a.kml");
        assert_eq!(creds.expires_in, 3600);
        let fields = creds.fields.unwrap();
        assert_eq!(fields["original-name"], "a.kml");
        assert_eq!(fields["fallback"], "true");
        assert_eq!(
            file_key_from_url(&creds.presigned_url).as_deref(),
            Some("input_kml_files/a.kml")
        );
    }
}
