//! Credential requester
//!
//! Asks the proxy's `/api/presigned-url` route for one-time upload
//! credentials. The request is re-validated here even if the caller already
//! ran the validator.

use chrono::Utc;
use reqwest::Client;

use kmlhub_core::keys::{file_key_from_url, namespaced_file_name};
use kmlhub_core::models::{IssuerPresignResponse, PresignedUrlRequest, UploadCredentials};
use kmlhub_core::validation::{has_kml_extension, is_kml_mime_type, MAX_UPLOAD_SIZE_BYTES};

use crate::error::CredentialError;
use crate::error_message;

/// Expiry assumed when the issuer does not send one.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

pub const PRESIGNED_URL_PATH: &str = "/api/presigned-url";

#[derive(Clone, Debug)]
pub struct CredentialRequester {
    client: Client,
    api_url: String,
}

impl CredentialRequester {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Request credentials for one file. Issues exactly one network call, and
    /// none at all when the local checks fail.
    #[tracing::instrument(skip(self), fields(api_url = %self.api_url))]
    pub async fn request_credentials(
        &self,
        file_name: &str,
        mime_type: &str,
        size_bytes: u64,
    ) -> Result<UploadCredentials, CredentialError> {
        if size_bytes > MAX_UPLOAD_SIZE_BYTES {
            return Err(CredentialError::PayloadTooLarge {
                size: size_bytes,
                max: MAX_UPLOAD_SIZE_BYTES,
            });
        }
        if !has_kml_extension(file_name) || !is_kml_mime_type(mime_type) {
            return Err(CredentialError::UnsupportedMediaType {
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
            });
        }

        let body = PresignedUrlRequest {
            file_name: namespaced_file_name(file_name),
        };
        let url = format!("{}{}", self.api_url, PRESIGNED_URL_PATH);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(CredentialError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            tracing::warn!(
                status_code = status.as_u16(),
                error = %message,
                "Credential request rejected"
            );
            return Err(CredentialError::UpstreamError {
                status_code: status.as_u16(),
                message,
            });
        }

        let issued: IssuerPresignResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;

        let credentials = build_credentials(issued, file_name, &body.file_name)?;

        tracing::debug!(
            file_key = %credentials.file_key,
            expires_in = credentials.expires_in_seconds,
            "Upload credentials issued"
        );

        Ok(credentials)
    }
}

fn build_credentials(
    issued: IssuerPresignResponse,
    file_name: &str,
    namespaced_name: &str,
) -> Result<UploadCredentials, CredentialError> {
    let transfer_url = issued.transfer_url().ok_or_else(|| {
        CredentialError::MalformedResponse("response has no presignedUrl".to_string())
    })?;

    let file_key = issued
        .storage_key()
        .or_else(|| file_key_from_url(&transfer_url))
        .unwrap_or_else(|| namespaced_name.to_string());

    let mut extra_fields = issued.fields.unwrap_or_default();
    extra_fields
        .entry("original-name".to_string())
        .or_insert_with(|| file_name.to_string());
    extra_fields
        .entry("upload-timestamp".to_string())
        .or_insert_with(|| Utc::now().timestamp_millis().to_string());

    Ok(UploadCredentials {
        transfer_url,
        file_key,
        expires_in_seconds: issued.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        extra_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_build_credentials_fills_defaults() {
        let issued = IssuerPresignResponse {
            presigned_url: Some(
                "https://store/bucket/input_kml_files/parcel.kml?sig=abc".to_string(),
            ),
            ..Default::default()
        };
        let creds =
            build_credentials(issued, "parcel.kml", "input_kml_files/parcel.kml").unwrap();
        assert_eq!(creds.file_key, "input_kml_files/parcel.kml");
        assert_eq!(creds.expires_in_seconds, 3600);
        assert_eq!(creds.extra_fields["original-name"], "parcel.kml");
        assert!(creds.extra_fields["upload-timestamp"].parse::<i64>().is_ok());
    }

    #[test]
    fn test_build_credentials_keeps_issuer_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("original-name".to_string(), "Parcel A.kml".to_string());
        let issued = IssuerPresignResponse {
            presigned_url: Some("https://store/x".to_string()),
            file_key: Some("input_kml_files/a.kml".to_string()),
            expires_in: Some(600),
            fields: Some(fields),
            ..Default::default()
        };
        let creds = build_credentials(issued, "a.kml", "input_kml_files/a.kml").unwrap();
        assert_eq!(creds.file_key, "input_kml_files/a.kml");
        assert_eq!(creds.expires_in_seconds, 600);
        assert_eq!(creds.extra_fields["original-name"], "Parcel A.kml");
    }

    #[test]
    fn test_build_credentials_requires_url() {
        let issued = IssuerPresignResponse {
            presigned_url: Some("  ".to_string()),
            ..Default::default()
        };
        let err = build_credentials(issued, "a.kml", "input_kml_files/a.kml").unwrap_err();
        assert!(matches!(err, CredentialError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_rechecks_size_without_network() {
        let requester = CredentialRequester::new(Client::new(), "http://127.0.0.1:9");
        let err = requester
            .request_credentials("big.kml", "application/xml", MAX_UPLOAD_SIZE_BYTES + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_rechecks_type_without_network() {
        let requester = CredentialRequester::new(Client::new(), "http://127.0.0.1:9");
        let err = requester
            .request_credentials("map.png", "image/png", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnsupportedMediaType { .. }));

        let err = requester
            .request_credentials("parcel.kml", "image/png", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnsupportedMediaType { .. }));
    }
}
