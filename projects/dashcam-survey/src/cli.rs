use crate::config::{
    AnalysisSchema, BatchSettings, ExtractionMode, ExtractionSettings, HealthBucket,
    PipelineConfig,
};
use crate::error::PipelineError;
use crate::monitor::MonitorOptions;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Root directory watched for .mp4 recordings
    #[arg(long, env = "DASHCAM_SURVEY_VIDEO_ROOT")]
    pub video_root: PathBuf,

    /// Root directory for run output
    #[arg(long, env = "DASHCAM_SURVEY_OUTPUT_ROOT")]
    pub output_root: PathBuf,

    /// Directory holding <video stem>.gpx track logs (defaults to next to each video)
    #[arg(long, env = "DASHCAM_SURVEY_TRACK_LOG_DIR")]
    pub track_log_dir: Option<PathBuf>,

    /// Copy analyzed frames into this directory
    #[arg(long, env = "DASHCAM_SURVEY_ARCHIVE_DIR")]
    pub archive_dir: Option<PathBuf>,

    /// Program that analyzes a batch of frames (JSON on stdin/stdout)
    #[arg(long, env = "DASHCAM_SURVEY_ANALYZER")]
    pub analyzer: PathBuf,

    /// Extra argument passed to the analyzer (repeatable)
    #[arg(long = "analyzer-arg", allow_hyphen_values = true)]
    pub analyzer_args: Vec<String>,

    #[arg(long, value_enum, default_value_t = AnalysisSchema::RoadCondition, env = "DASHCAM_SURVEY_SCHEMA")]
    pub schema: AnalysisSchema,

    #[arg(long, value_enum, default_value_t = ExtractionMode::Sampled)]
    pub mode: ExtractionMode,

    /// Frames per second kept in sampled mode
    #[arg(long, default_value_t = 0.5)]
    pub sample_rate: f64,

    #[arg(long)]
    pub max_frames: Option<usize>,

    /// Real seconds between frames in all-frames (time-lapse) mode
    #[arg(long, default_value_t = 1.0)]
    pub seconds_per_frame: f64,

    /// Pixels cropped from the top of every frame
    #[arg(long, default_value_t = 0)]
    pub crop_top: u32,

    #[arg(long, default_value_t = 6, env = "DASHCAM_SURVEY_BATCH_SIZE")]
    pub batch_size: usize,

    #[arg(long, default_value_t = 20, env = "DASHCAM_SURVEY_MAX_CONCURRENT_BATCHES")]
    pub max_concurrent_batches: usize,

    /// Seconds before an analysis call is abandoned
    #[arg(long, default_value_t = 300)]
    pub analysis_timeout_secs: u64,

    /// Health histogram buckets, e.g. "0-19,20-39,40-59,60-79,80-100"
    #[arg(long)]
    pub health_buckets: Option<String>,

    /// Confidence at which a detected condition flags a frame
    #[arg(long, default_value_t = 0.9)]
    pub flag_confidence: f64,

    #[arg(long, default_value = "ffmpeg", env = "DASHCAM_SURVEY_FFMPEG")]
    pub ffmpeg: PathBuf,

    #[arg(long, default_value = "ffprobe", env = "DASHCAM_SURVEY_FFPROBE")]
    pub ffprobe: PathBuf,

    #[arg(long, default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Process the current backlog and exit
    #[arg(long)]
    pub once: bool,

    /// Show a progress bar while batches run
    #[arg(long)]
    pub progress: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        let health_buckets = match &self.health_buckets {
            Some(spec) => HealthBucket::parse_list(spec)?,
            None => self.schema.default_health_buckets(),
        };
        let config = PipelineConfig {
            output_root: self.output_root.clone(),
            batch: BatchSettings {
                batch_size: self.batch_size,
                max_concurrent_batches: self.max_concurrent_batches,
                timeout: self.analysis_timeout(),
            },
            extraction: ExtractionSettings {
                mode: self.mode,
                sample_rate: self.sample_rate,
                max_frames: self.max_frames,
                seconds_per_frame: self.seconds_per_frame,
                crop_top: self.crop_top,
            },
            schema: self.schema,
            health_buckets,
            flag_confidence_threshold: self.flag_confidence,
            show_progress: self.progress,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            video_root: self.video_root.clone(),
            processed_log: self.output_root.join("processed_videos.log"),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            once: self.once,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "dashcam-survey",
            "--video-root",
            "/videos",
            "--output-root",
            "/out",
            "--analyzer",
            "/usr/local/bin/analyze",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_build_config() {
        let args = parse(&[]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.schema, AnalysisSchema::RoadCondition);
        assert_eq!(config.batch.timeout, Duration::from_secs(300));
        assert_eq!(config.extraction.mode, ExtractionMode::Sampled);
        assert_eq!(config.health_buckets.len(), 5);
        assert_eq!(
            args.monitor_options().processed_log,
            PathBuf::from("/out/processed_videos.log")
        );
    }

    #[test]
    fn test_greenway_all_frames_with_custom_buckets() {
        let args = parse(&[
            "--schema",
            "greenway",
            "--mode",
            "all-frames",
            "--seconds-per-frame",
            "2",
            "--health-buckets",
            "1-5,6-10",
            "--analyzer-arg",
            "--model=vision",
        ]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.schema, AnalysisSchema::Greenway);
        assert_eq!(config.extraction.mode, ExtractionMode::AllFrames);
        assert_eq!(config.extraction.seconds_per_frame, 2.0);
        assert_eq!(config.health_buckets[1].label, "6-10");
        assert_eq!(args.analyzer_args, vec!["--model=vision"]);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let args = parse(&["--batch-size", "0"]);
        assert_matches!(args.pipeline_config(), Err(PipelineError::InvalidConfig(_)));
    }
}
