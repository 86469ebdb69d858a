use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Processing,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Error)
    }
}

impl Display for AnalysisStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AnalysisStatus::Processing => write!(f, "processing"),
            AnalysisStatus::Completed => write!(f, "completed"),
            AnalysisStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" | "queued" | "pending" => Ok(AnalysisStatus::Processing),
            "completed" | "complete" => Ok(AnalysisStatus::Completed),
            "error" | "failed" => Ok(AnalysisStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid analysis status: {}", s)),
        }
    }
}

/// Geographic extent of the analysed features, in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        (-180.0..=180.0).contains(&self.min_lon)
            && (-180.0..=180.0).contains(&self.max_lon)
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
            && self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
    }
}

/// Statistics produced once an analysis completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub feature_count: u32,
    pub geometry_types: Vec<String>,
    pub bounding_box: BoundingBox,
    pub point_count: u32,
    pub line_count: u32,
    pub polygon_count: u32,
}

/// Caller-visible record of one file's downstream analysis.
///
/// Created when the processing service acknowledges a file and updated by the
/// status poller until `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub tracking_id: String,
    pub source_file_name: String,
    pub file_key: String,
    pub status: AnalysisStatus,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(
        tracking_id: impl Into<String>,
        source_file_name: impl Into<String>,
        file_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tracking_id: tracking_id.into(),
            source_file_name: source_file_name.into(),
            file_key: file_key.into(),
            status: AnalysisStatus::Processing,
            progress_percent: 0,
            result_summary: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status update and return the new snapshot.
    ///
    /// Progress never moves backwards; a completed record always reads 100.
    pub fn apply(&mut self, update: StatusUpdate) -> &Self {
        self.status = update.status;
        self.progress_percent = match update.status {
            AnalysisStatus::Completed => 100,
            _ => update.progress_percent.min(100).max(self.progress_percent),
        };
        if update.result_summary.is_some() {
            self.result_summary = update.result_summary;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.updated_at = Utc::now();
        self
    }
}

/// One observation returned by a status source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: AnalysisStatus,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<ResultSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn processing(progress_percent: u8) -> Self {
        Self {
            status: AnalysisStatus::Processing,
            progress_percent,
            result_summary: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Error,
            progress_percent: 0,
            result_summary: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "processing".parse::<AnalysisStatus>().unwrap(),
            AnalysisStatus::Processing
        );
        assert_eq!(
            "completed".parse::<AnalysisStatus>().unwrap(),
            AnalysisStatus::Completed
        );
        assert_eq!(
            "failed".parse::<AnalysisStatus>().unwrap(),
            AnalysisStatus::Error
        );
        assert!("unknown".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_apply_keeps_progress_monotonic() {
        let mut record = AnalysisRecord::new("analysis-1-abcdefghi", "parcel.kml", "k");
        record.apply(StatusUpdate::processing(40));
        record.apply(StatusUpdate::processing(20));
        assert_eq!(record.progress_percent, 40);
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_apply_completed_sets_full_progress() {
        let mut record = AnalysisRecord::new("analysis-1-abcdefghi", "parcel.kml", "k");
        record.apply(StatusUpdate {
            status: AnalysisStatus::Completed,
            progress_percent: 70,
            result_summary: None,
            error: None,
        });
        assert_eq!(record.progress_percent, 100);
        assert!(record.is_terminal());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = AnalysisRecord::new("analysis-1-abcdefghi", "parcel.kml", "input_kml_files/parcel.kml");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["trackingId"], "analysis-1-abcdefghi");
        assert_eq!(json["status"], "processing");
        assert!(json.get("resultSummary").is_none());
    }

    #[test]
    fn test_bounding_box_validity() {
        let bbox = BoundingBox {
            min_lon: -122.5,
            min_lat: 37.7,
            max_lon: -122.3,
            max_lat: 37.9,
        };
        assert!(bbox.is_valid());
        let inverted = BoundingBox {
            min_lon: 10.0,
            min_lat: 0.0,
            max_lon: 5.0,
            max_lat: 1.0,
        };
        assert!(!inverted.is_valid());
    }
}
