// Frame extraction through the ffprobe/ffmpeg command line tools

use super::{cropped_height, sample_indices, ExtractedFrame, FrameExtractor, VideoProbe};
use crate::config::{ExtractionMode, ExtractionSettings};
use crate::error::ExtractionError;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Reads `-show_entries stream=width,height,nb_frames,avg_frame_rate,duration -of json`.
pub fn parse_probe_output(json: &[u8]) -> Result<VideoProbe, ExtractionError> {
    let output: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| ExtractionError::Probe(e.to_string()))?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::Probe("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ExtractionError::Probe("missing frame dimensions".to_string())),
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| ExtractionError::Probe("missing average frame rate".to_string()))?;

    // Some containers omit nb_frames; fall back to duration * fps
    let frame_count = match stream.nb_frames.as_deref().and_then(|n| n.parse::<usize>().ok()) {
        Some(n) => n,
        None => {
            let duration: f64 = stream
                .duration
                .as_deref()
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| ExtractionError::Probe("missing frame count".to_string()))?;
            (duration * fps).floor() as usize
        }
    };

    Ok(VideoProbe {
        width,
        height,
        fps,
        frame_count,
    })
}

pub struct FfmpegExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn run(&self, binary: &Path, args: &[OsString]) -> Result<Vec<u8>, ExtractionError> {
        let name = binary.display().to_string();
        let output = Command::new(binary).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractionError::NotFound {
                    binary: name.clone(),
                    source: e,
                }
            } else {
                ExtractionError::Io(e)
            }
        })?;

        if !output.status.success() {
            return Err(ExtractionError::ExecutionFailed {
                binary: name,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// ffmpeg arguments for one extraction, output pattern last.
    pub fn build_args(
        video: &Path,
        probe: &VideoProbe,
        settings: &ExtractionSettings,
        output_pattern: &Path,
    ) -> Result<Vec<OsString>, ExtractionError> {
        let mut filters = Vec::new();
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(video.as_os_str().to_os_string());

        let limit = match settings.mode {
            ExtractionMode::Sampled => {
                let interval = super::frame_interval(probe.fps, settings.sample_rate);
                filters.push(format!("select='not(mod(n\\,{}))'", interval));
                Some(sample_indices(probe, settings.sample_rate, settings.max_frames).len())
            }
            ExtractionMode::AllFrames => settings.max_frames,
        };

        if settings.crop_top > 0 {
            let height = cropped_height(probe, settings.crop_top)?;
            filters.push(format!(
                "crop={}:{}:0:{}",
                probe.width, height, settings.crop_top
            ));
        }

        if !filters.is_empty() {
            args.push("-vf".into());
            args.push(filters.join(",").into());
        }

        let vsync = match settings.mode {
            ExtractionMode::Sampled => "vfr",
            ExtractionMode::AllFrames => "0",
        };
        args.push("-vsync".into());
        args.push(vsync.into());

        if let Some(limit) = limit {
            args.push("-frames:v".into());
            args.push(limit.to_string().into());
        }

        args.push("-q:v".into());
        args.push("2".into());
        args.push(output_pattern.as_os_str().to_os_string());
        Ok(args)
    }
}

/// Files ffmpeg wrote for a `<stem>_%04d.jpg` pattern, in sequence order.
fn numbered_outputs(output_dir: &Path, stem: &str) -> Vec<PathBuf> {
    (1..)
        .map(|i| output_dir.join(format!("{}_{:04}.jpg", stem, i)))
        .take_while(|p| p.is_file())
        .collect()
}

impl FrameExtractor for FfmpegExtractor {
    fn probe(&self, video: &Path) -> Result<VideoProbe, ExtractionError> {
        if !video.is_file() {
            return Err(ExtractionError::VideoNotFound(video.to_path_buf()));
        }
        let args: Vec<OsString> = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,nb_frames,avg_frame_rate,duration",
            "-of",
            "json",
        ]
        .iter()
        .map(OsString::from)
        .chain(std::iter::once(video.as_os_str().to_os_string()))
        .collect();

        let stdout = self.run(&self.ffprobe, &args)?;
        let probe = parse_probe_output(&stdout)?;
        tracing::info!(
            "Probed {:?}: {}x{} @ {:.2} fps, {} frames",
            video,
            probe.width,
            probe.height,
            probe.fps,
            probe.frame_count
        );
        Ok(probe)
    }

    fn extract_frames(
        &self,
        video: &Path,
        probe: &VideoProbe,
        settings: &ExtractionSettings,
        output_dir: &Path,
    ) -> Result<Vec<ExtractedFrame>, ExtractionError> {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());

        // Timestamps are planned up front; ffmpeg only numbers its outputs
        let planned: Vec<f64> = match settings.mode {
            ExtractionMode::Sampled => sample_indices(probe, settings.sample_rate, settings.max_frames)
                .into_iter()
                .map(|i| i as f64 / probe.fps)
                .collect(),
            ExtractionMode::AllFrames => {
                let count = settings
                    .max_frames
                    .map_or(probe.frame_count, |m| m.min(probe.frame_count));
                (0..count).map(|i| i as f64 * settings.seconds_per_frame).collect()
            }
        };
        if planned.is_empty() {
            return Err(ExtractionError::NoFrames(video.to_path_buf()));
        }

        std::fs::create_dir_all(output_dir)?;
        let pattern = output_dir.join(format!("{}_%04d.jpg", stem));
        let args = Self::build_args(video, probe, settings, &pattern)?;
        self.run(&self.ffmpeg, &args)?;

        let outputs = numbered_outputs(output_dir, &stem);
        if outputs.is_empty() {
            return Err(ExtractionError::NoFrames(video.to_path_buf()));
        }
        if outputs.len() != planned.len() {
            tracing::warn!(
                "Expected {} frames from {:?}, ffmpeg wrote {}",
                planned.len(),
                video,
                outputs.len()
            );
        }

        let frames: Vec<ExtractedFrame> = outputs
            .into_iter()
            .zip(planned)
            .map(|(artifact_path, relative_timestamp_secs)| ExtractedFrame {
                artifact_path,
                relative_timestamp_secs,
            })
            .collect();
        tracing::info!("Extracted {} frames from {:?}", frames.len(), video);
        Ok(frames)
    }
}
