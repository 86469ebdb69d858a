use std::path::Path;

use anyhow::Context;
use kmlhub_core::models::UploadRequest;
use kmlhub_core::validation::mime_type_for;

/// A file read from disk, ready to hand to the orchestrator.
pub struct LocalFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl LocalFile {
    pub fn request(&self) -> UploadRequest {
        UploadRequest::new(
            self.file_name.clone(),
            self.mime_type.clone(),
            self.data.len() as u64,
        )
    }
}

/// Read a file and guess its MIME type from the extension.
pub async fn read_local_file(path: &Path) -> anyhow::Result<LocalFile> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(LocalFile {
        mime_type: mime_type_for(&file_name).to_string(),
        file_name,
        data,
    })
}

/// Human-readable byte count, e.g. `2.0 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn format_bytes_scaled() {
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.0 MiB");
        assert_eq!(format_bytes(50 * 1024 * 1024 + 512 * 1024), "50.5 MiB");
    }

    #[tokio::test]
    async fn read_local_file_guesses_mime_type() {
        let dir = std::env::temp_dir().join(format!("kmlhub-cli-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("parcel.kml");
        tokio::fs::write(&path, b"<kml/>").await.unwrap();

        let file = read_local_file(&path).await.unwrap();
        assert_eq!(file.file_name, "parcel.kml");
        assert_eq!(file.mime_type, "application/vnd.google-earth.kml+xml");
        assert_eq!(file.request().size_bytes, 6);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn read_local_file_missing_path_errors() {
        let err = read_local_file(Path::new("/nonexistent/dir/parcel.kml"))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to read"));
    }
}
