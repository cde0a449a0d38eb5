use crate::analysis::{AnalysisPayload, BatchItem};
use crate::video::ExtractedFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    Complete(AnalysisPayload),
}

/// Everything known about one extracted frame.
///
/// Created at extraction, positioned by correlation, filled in by batch
/// reconciliation. Storage slots only ever hold values a collaborator returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub filename: String,
    pub filepath: PathBuf,
    pub source_video: PathBuf,
    /// Seconds from the start of the recording
    pub relative_timestamp_secs: f64,
    pub absolute_timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub analysis: AnalysisState,
    pub external_analysis_file_id: Option<String>,
    pub archive_file_id: Option<String>,
    pub archive_url: Option<String>,
    /// Set once the record has been placed in a dispatched batch
    #[serde(skip)]
    pub dispatched: bool,
}

impl FrameRecord {
    pub fn new(filepath: PathBuf, source_video: &Path, relative_timestamp_secs: f64) -> Self {
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            filepath,
            source_video: source_video.to_path_buf(),
            relative_timestamp_secs,
            absolute_timestamp: None,
            latitude: None,
            longitude: None,
            analysis: AnalysisState::Pending,
            external_analysis_file_id: None,
            archive_file_id: None,
            archive_url: None,
            dispatched: false,
        }
    }

    pub fn from_extracted(frame: &ExtractedFrame, source_video: &Path) -> Self {
        Self::new(
            frame.artifact_path.clone(),
            source_video,
            frame.relative_timestamp_secs,
        )
    }

    pub fn is_analyzed(&self) -> bool {
        matches!(self.analysis, AnalysisState::Complete(_))
    }

    pub fn payload(&self) -> Option<&AnalysisPayload> {
        match &self.analysis {
            AnalysisState::Complete(payload) => Some(payload),
            AnalysisState::Pending => None,
        }
    }

    /// `(latitude, longitude)` when both are set and finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn batch_item(&self) -> BatchItem {
        BatchItem {
            id: self.filename.clone(),
            artifact_path: self.filepath.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_record_starts_pending_without_position() {
        let record = FrameRecord::new(
            PathBuf::from("/out/frames/clip_0003.jpg"),
            Path::new("/videos/clip.mp4"),
            4.0,
        );
        assert_eq!(record.filename, "clip_0003.jpg");
        assert!(!record.is_analyzed());
        assert!(record.coordinates().is_none());
        assert_eq!(record.batch_item().id, "clip_0003.jpg");
    }

    #[test]
    fn test_coordinates_require_both_finite_values() {
        let mut record = FrameRecord::new(PathBuf::from("a.jpg"), Path::new("v.mp4"), 0.0);
        record.latitude = Some(35.2);
        assert!(record.coordinates().is_none());
        record.longitude = Some(f64::NAN);
        assert!(record.coordinates().is_none());
        record.longitude = Some(-80.8);
        assert_eq!(record.coordinates(), Some((35.2, -80.8)));
    }

    #[test]
    fn test_pending_state_serializes_as_status() {
        let record = FrameRecord::new(PathBuf::from("a.jpg"), Path::new("v.mp4"), 0.0);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["analysis"]["status"], "pending");
        assert!(json.get("dispatched").is_none());
    }
}
