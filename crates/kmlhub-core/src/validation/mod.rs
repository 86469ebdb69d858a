//! File validation
//!
//! Size and extension checks run before any network call. The functions are
//! pure: they look only at the [`UploadRequest`] and the configured limits.

use crate::models::{file_extension, UploadRequest};

/// Hard ceiling enforced again when credentials are requested: 50 MiB.
pub const MAX_UPLOAD_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// Extensions the pipeline accepts.
pub const KML_EXTENSIONS: [&str; 2] = ["kml", "kmz"];

/// MIME types accepted for KML/KMZ uploads.
///
/// Browsers and operating systems disagree on how to label these files, so
/// generic XML/ZIP/binary types are accepted alongside the Google Earth ones.
pub const KML_MIME_TYPES: [&str; 8] = [
    "application/vnd.google-earth.kml+xml",
    "application/vnd.google-earth.kml",
    "application/vnd.google-earth.kmz",
    "application/xml",
    "text/xml",
    "application/zip",
    "application/x-zip-compressed",
    "application/octet-stream",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Unsupported file type: {file_name} (allowed: {allowed:?})")]
    UnsupportedType {
        file_name: String,
        allowed: Vec<String>,
    },
}

/// Check a file's size and extension against the given limits.
pub fn validate(
    request: &UploadRequest,
    max_size_bytes: u64,
    allowed_extensions: &[String],
) -> Result<(), ValidationError> {
    if request.size_bytes > max_size_bytes {
        return Err(ValidationError::TooLarge {
            size: request.size_bytes,
            max: max_size_bytes,
        });
    }

    let allowed = request
        .extension()
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false);
    if !allowed {
        return Err(ValidationError::UnsupportedType {
            file_name: request.file_name.clone(),
            allowed: allowed_extensions.to_vec(),
        });
    }

    Ok(())
}

/// True when `file_name` ends in `.kml` or `.kmz` (any case).
pub fn has_kml_extension(file_name: &str) -> bool {
    file_extension(file_name)
        .map(|ext| KML_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// True when the MIME type is one a KML/KMZ file may arrive with.
///
/// An empty type is accepted: some platforms do not label KMZ files at all.
/// Parameters such as `; charset=utf-8` are ignored.
pub fn is_kml_mime_type(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    essence.is_empty() || KML_MIME_TYPES.contains(&essence.as_str())
}

/// Canonical MIME type for a KML/KMZ filename.
pub fn mime_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("kml") => "application/vnd.google-earth.kml+xml",
        Some("kmz") => "application/vnd.google-earth.kmz",
        _ => "application/octet-stream",
    }
}

/// Validator bound to a size limit and extension allowlist.
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_size_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl FileValidator {
    pub fn new(max_size_bytes: u64, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_size_bytes,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn validate(&self, request: &UploadRequest) -> Result<(), ValidationError> {
        validate(request, self.max_size_bytes, &self.allowed_extensions)
    }
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(
            MAX_UPLOAD_SIZE_BYTES,
            KML_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kml_extensions() -> Vec<String> {
        vec!["kml".to_string(), "kmz".to_string()]
    }

    #[test]
    fn test_validate_ok() {
        let request = UploadRequest::new("parcel.kml", "application/vnd.google-earth.kml", 2 * 1024 * 1024);
        assert!(validate(&request, MAX_UPLOAD_SIZE_BYTES, &kml_extensions()).is_ok());
    }

    #[test]
    fn test_validate_size_at_limit_is_ok() {
        let request = UploadRequest::new("parcel.kmz", "", 1024);
        assert!(validate(&request, 1024, &kml_extensions()).is_ok());
    }

    #[test]
    fn test_validate_too_large() {
        let request = UploadRequest::new("parcel.kml", "", 1025);
        assert_eq!(
            validate(&request, 1024, &kml_extensions()),
            Err(ValidationError::TooLarge {
                size: 1025,
                max: 1024
            })
        );
    }

    #[test]
    fn test_validate_size_checked_before_type() {
        let request = UploadRequest::new("map.png", "image/png", 2048);
        assert!(matches!(
            validate(&request, 1024, &kml_extensions()),
            Err(ValidationError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_unsupported_type() {
        let request = UploadRequest::new("map.png", "image/png", 10);
        assert!(matches!(
            validate(&request, 1024, &kml_extensions()),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_validate_extension_case_insensitive() {
        let request = UploadRequest::new("PARCEL.KML", "", 10);
        assert!(validate(&request, 1024, &kml_extensions()).is_ok());
    }

    #[test]
    fn test_validate_missing_extension() {
        let request = UploadRequest::new("parcel", "", 10);
        assert!(matches!(
            validate(&request, 1024, &kml_extensions()),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_file_validator_normalizes_extensions() {
        let validator = FileValidator::new(1024, vec![".KML".to_string(), " kmz ".to_string()]);
        assert_eq!(validator.allowed_extensions(), &["kml", "kmz"]);
        assert!(validator
            .validate(&UploadRequest::new("a.kmz", "", 1))
            .is_ok());
    }

    #[test]
    fn test_is_kml_mime_type() {
        assert!(is_kml_mime_type("application/vnd.google-earth.kml+xml"));
        assert!(is_kml_mime_type("application/vnd.google-earth.kml"));
        assert!(is_kml_mime_type("Application/XML; charset=utf-8"));
        assert!(is_kml_mime_type(""));
        assert!(!is_kml_mime_type("image/png"));
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("a.kml"), "application/vnd.google-earth.kml+xml");
        assert_eq!(mime_type_for("a.KMZ"), "application/vnd.google-earth.kmz");
        assert_eq!(mime_type_for("a.txt"), "application/octet-stream");
    }
}
