use super::TelemetryTrace;
use crate::error::TelemetryError;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Source of the track log recorded alongside a video.
pub trait TrackLogProvider: Send + Sync {
    fn load_track_log(&self, video: &Path) -> Result<TelemetryTrace, TelemetryError>;
}

/// Finds `<stem>.gpx` in a track-log directory or next to the video.
#[derive(Debug, Clone, Default)]
pub struct GpxSidecarProvider {
    track_log_dir: Option<PathBuf>,
}

impl GpxSidecarProvider {
    pub fn new(track_log_dir: Option<PathBuf>) -> Self {
        Self { track_log_dir }
    }

    pub fn candidates(&self, video: &Path) -> Vec<PathBuf> {
        let Some(stem) = video.file_stem() else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = &self.track_log_dir {
            dirs.push(dir.clone());
        }
        dirs.push(video.parent().map(Path::to_path_buf).unwrap_or_default());

        let mut out = Vec::new();
        for dir in dirs {
            for ext in ["gpx", "GPX"] {
                let mut name = stem.to_os_string();
                name.push(".");
                name.push(ext);
                out.push(dir.join(name));
            }
        }
        out
    }
}

impl TrackLogProvider for GpxSidecarProvider {
    fn load_track_log(&self, video: &Path) -> Result<TelemetryTrace, TelemetryError> {
        let path = self
            .candidates(video)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| TelemetryError::NoTelemetry(video.to_path_buf()))?;

        tracing::info!("Loading track log {:?} for {:?}", path, video);
        let file = File::open(&path)
            .map_err(|e| TelemetryError::Parse(format!("{}: {}", path.display(), e)))?;
        TelemetryTrace::parse(file)
    }
}
