use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A file the caller selected for upload.
///
/// Immutable once created; the orchestrator discards it on reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    /// Lowercase suffix after the last dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.file_name)
    }
}

/// Lowercase suffix after the last dot of `file_name`.
///
/// Returns `None` for names without a dot, names ending in a dot, and
/// dot-files such as `.kml` that have no stem.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// One-time credentials for a direct object-store upload.
///
/// `expires_in_seconds` is informational; nothing enforces it locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCredentials {
    pub transfer_url: String,
    pub file_key: String,
    pub expires_in_seconds: u64,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

/// Byte progress of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub percentage: u8,
}

impl TransferProgress {
    /// Build a progress value with `percentage = floor(sent / total * 100)`.
    ///
    /// An empty transfer reports 0 until it is marked complete.
    pub fn new(bytes_sent: u64, bytes_total: u64) -> Self {
        let bytes_sent = bytes_sent.min(bytes_total);
        let percentage = if bytes_total == 0 {
            0
        } else {
            ((bytes_sent as u128 * 100) / bytes_total as u128) as u8
        };
        Self {
            bytes_sent,
            bytes_total,
            percentage,
        }
    }

    pub fn complete(bytes_total: u64) -> Self {
        Self {
            bytes_sent: bytes_total,
            bytes_total,
            percentage: 100,
        }
    }

    /// Same progress, capped below 100. Used while the store has not answered yet.
    pub fn pending_ack(self) -> Self {
        Self {
            percentage: self.percentage.min(99),
            ..self
        }
    }
}

/// Visible state of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Uploading(TransferProgress),
    #[serde(rename_all = "camelCase")]
    Success {
        file_key: String,
        tracking_id: String,
    },
    Error {
        message: String,
    },
}

impl UploadState {
    pub fn is_uploading(&self) -> bool {
        matches!(self, UploadState::Uploading(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Success { .. } | UploadState::Error { .. })
    }
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadState::Idle => write!(f, "idle"),
            UploadState::Uploading(p) => write!(f, "uploading ({}%)", p.percentage),
            UploadState::Success {
                file_key,
                tracking_id,
            } => write!(f, "success ({} -> {})", file_key, tracking_id),
            UploadState::Error { message } => write!(f, "error: {}", message),
        }
    }
}
