use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use kmlhub_core::keys::{file_key_from_url, synthesized_file_key};
use kmlhub_core::models::{UploadProxyResponse, UploadRequest};
use kmlhub_core::validation::mime_type_for;
use kmlhub_core::AppError;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;

/// Relay a file to a presigned URL
///
/// Multipart fields: `file` (the bytes) and `presignedUrl` (the PUT target).
/// Storage failures answer 500. Problems with the request itself answer 4xx
/// before storage is contacted (400 for a missing field, 413 for an oversize
/// file, 415 for a non-KML/KMZ file) instead of the plain 500 a bare relay
/// would return.
#[utoipa::path(
    post,
    path = "/api/upload-proxy",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", description = "`file` and `presignedUrl` fields"),
    responses(
        (status = 200, description = "File stored", body = UploadProxyResponse),
        (status = 400, description = "Missing or invalid field", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 415, description = "Not a .kml or .kmz file", body = ErrorResponse),
        (status = 500, description = "Storage rejected the upload", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(operation = "upload_proxy"))]
pub async fn upload_proxy(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let mut file: Option<(String, Option<String>, axum::body::Bytes)> = None;
    let mut presigned_url: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.kml").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                file = Some((file_name, content_type, data));
            }
            "presignedUrl" => {
                presigned_url = Some(field.text().await?.trim().to_string());
            }
            _ => {}
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| AppError::InvalidInput("Missing file field".to_string()))?;
    let presigned_url = presigned_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing presignedUrl field".to_string()))?;

    let content_type = content_type
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| mime_type_for(&file_name).to_string());
    let request = UploadRequest::new(file_name, content_type, data.len() as u64);
    state.config.validator().validate(&request)?;

    tracing::info!(
        file_name = %request.file_name,
        size_bytes = request.size_bytes,
        "Relaying upload to storage"
    );

    let response = state
        .http_client
        .put(&presigned_url)
        .header(CONTENT_TYPE, request.mime_type.as_str())
        .timeout(state.config.relay_timeout())
        .body(data)
        .send()
        .await
        .map_err(|e| AppError::Storage(format!("Failed to upload file: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::Storage(format!(
            "Storage responded with status {}: {}",
            status.as_u16(),
            text
        ))
        .into());
    }

    let file_key = file_key_from_url(&presigned_url).unwrap_or_else(|| {
        synthesized_file_key(&request.file_name, Utc::now().timestamp_millis())
    });

    tracing::info!(file_key = %file_key, "Relayed upload stored");

    Ok(Json(UploadProxyResponse {
        success: true,
        file_key,
        message: "File uploaded successfully".to_string(),
    }))
}
