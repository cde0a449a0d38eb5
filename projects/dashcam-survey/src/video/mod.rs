pub mod ffmpeg;

use crate::config::ExtractionSettings;
use crate::error::ExtractionError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Stream facts needed to plan extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: usize,
}

impl VideoProbe {
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// A still written to disk and its offset into the recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFrame {
    pub artifact_path: PathBuf,
    pub relative_timestamp_secs: f64,
}

pub trait FrameExtractor: Send + Sync {
    fn probe(&self, video: &Path) -> Result<VideoProbe, ExtractionError>;

    /// Writes stills into `output_dir`, returned in ascending timestamp order.
    fn extract_frames(
        &self,
        video: &Path,
        probe: &VideoProbe,
        settings: &ExtractionSettings,
        output_dir: &Path,
    ) -> Result<Vec<ExtractedFrame>, ExtractionError>;
}

/// Every `round(fps / sample_rate)`-th frame, at least every frame.
pub fn frame_interval(fps: f64, sample_rate: f64) -> usize {
    if fps <= 0.0 || sample_rate <= 0.0 {
        return 1;
    }
    ((fps / sample_rate).round() as usize).max(1)
}

/// Source frame indices kept in sampled mode.
pub fn sample_indices(probe: &VideoProbe, sample_rate: f64, max_frames: Option<usize>) -> Vec<usize> {
    let interval = frame_interval(probe.fps, sample_rate);
    let indices = (0..probe.frame_count).step_by(interval);
    match max_frames {
        Some(max) => indices.take(max).collect(),
        None => indices.collect(),
    }
}

/// Rows left after removing `crop_top`, or an error if none remain.
pub fn cropped_height(probe: &VideoProbe, crop_top: u32) -> Result<u32, ExtractionError> {
    if crop_top >= probe.height {
        return Err(ExtractionError::InvalidCrop {
            crop_top,
            height: probe.height,
        });
    }
    Ok(probe.height - crop_top)
}
