use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

/// Request to obtain presigned upload credentials
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlRequest {
    /// Storage-namespaced filename, e.g. `input_kml_files/parcel.kml`
    #[validate(length(
        min = 1,
        max = 1024,
        message = "fileName must be between 1 and 1024 characters"
    ))]
    pub file_name: String,
}

/// Presigned upload credentials returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlResponse {
    /// Time-limited URL accepting a PUT of the raw file bytes
    pub presigned_url: String,
    /// Storage key the object will be written under
    pub file_key: String,
    /// Seconds until the URL expires
    pub expires_in: u64,
    /// Extra form fields to send along with the upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Body returned by the external credential issuer.
///
/// Every field is optional so a partial answer can be detected and reported
/// instead of failing deserialization. Issuers name the upload URL and the key
/// differently and may send several spellings at once, so each spelling is its
/// own field and [`transfer_url`](Self::transfer_url) /
/// [`storage_key`](Self::storage_key) pick one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerPresignResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub fields: Option<BTreeMap<String, String>>,
}

fn first_non_empty<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|c| !c.is_empty())
}

impl IssuerPresignResponse {
    /// Upload URL, preferring `presignedUrl`, then `transferUrl`, `uploadUrl`, `url`.
    pub fn transfer_url(&self) -> Option<String> {
        first_non_empty(&[
            &self.presigned_url,
            &self.transfer_url,
            &self.upload_url,
            &self.url,
        ])
        .map(str::to_string)
    }

    /// Storage key, preferring `fileKey` over `key`.
    pub fn storage_key(&self) -> Option<String> {
        first_non_empty(&[&self.file_key, &self.key]).map(str::to_string)
    }
}

/// Response of the upload relay route
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProxyResponse {
    pub success: bool,
    pub file_key: String,
    pub message: String,
}

/// Body sent to a processing trigger endpoint once a file is stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTriggerRequest {
    pub file_key: String,
}

/// Acknowledgement from a processing trigger endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTriggerResponse {
    pub tracking_id: String,
}
