use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VideoMetadata {
    pub original_name: String,
    pub source_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(video_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("mp4"))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    videos.sort();
    videos
}

/// Creates `<output_root>/<stem>_<timestamp>/metadata.json` for a new run.
pub fn create_run(output_root: &Path, video: &Path) -> Result<VideoMetadata> {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid video name: {:?}", video))?;

    let created_at = Utc::now();
    let run_id = format!("{}_{}", stem, created_at.format("%Y%m%d_%H%M%S"));
    let output_dir = output_root.join(&run_id);
    if output_dir.exists() {
        return Err(anyhow::anyhow!(
            "Output directory already exists for: {}",
            run_id
        ));
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create run directory {:?}", output_dir))?;

    let metadata = VideoMetadata {
        original_name: video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stem.to_string()),
        source_path: video.to_path_buf(),
        created_at,
        run_id,
        output_dir: output_dir.clone(),
    };

    let metadata_path = output_dir.join("metadata.json");
    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(metadata_path, content)?;

    Ok(metadata)
}

/// Append-only record of videos that completed, one path per line.
#[derive(Debug)]
pub struct ProcessedLog {
    path: PathBuf,
    entries: HashSet<String>,
}

impl ProcessedLog {
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read processed log {:?}", path))?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn key(video: &Path) -> String {
        video.to_string_lossy().into_owned()
    }

    pub fn contains(&self, video: &Path) -> bool {
        self.entries.contains(&Self::key(video))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, video: &Path) -> Result<()> {
        let key = Self::key(video);
        if self.entries.contains(&key) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open processed log {:?}", self.path))?;
        writeln!(file, "{}", key)?;
        self.entries.insert(key);
        Ok(())
    }
}
