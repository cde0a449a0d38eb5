// Pipeline orchestrator: drives one video through every stage
//
// Stage errors are captured on the run rather than returned, so callers can
// keep going with the next video. Partial frame artifacts are removed when a
// run fails; the source video is never touched.

use crate::analysis::AnalysisService;
use crate::config::{ExtractionMode, PipelineConfig};
use crate::error::PipelineError;
use crate::pipeline::assemble::{summarize, to_feature_collection, Summary};
use crate::pipeline::batching::{BatchCoordinator, BatchReport};
use crate::pipeline::finalize::{self, Coverage, Overview};
use crate::pipeline::run_state::{PipelineRun, PipelineStage};
use crate::pipeline::types::FrameRecord;
use crate::run_context;
use crate::storage::{archive_records, ArchiveService};
use crate::telemetry::aligner::correlate;
use crate::telemetry::provider::TrackLogProvider;
use crate::video::FrameExtractor;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of processing one video, whether it completed or failed.
#[derive(Debug)]
pub struct ProcessedRun {
    pub run: PipelineRun,
    pub output_dir: PathBuf,
    pub summary: Option<Summary>,
    pub batches: Option<BatchReport>,
}

impl ProcessedRun {
    pub fn is_complete(&self) -> bool {
        self.run.stage() == PipelineStage::Complete
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    extractor: Arc<dyn FrameExtractor>,
    track_logs: Arc<dyn TrackLogProvider>,
    analyzer: Arc<dyn AnalysisService>,
    archive: Option<Arc<dyn ArchiveService>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn FrameExtractor>,
        track_logs: Arc<dyn TrackLogProvider>,
        analyzer: Arc<dyn AnalysisService>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            extractor,
            track_logs,
            analyzer,
            archive: None,
        })
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveService>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `video` to Complete or Failed. Only an inability to create the
    /// run directory is returned as an error.
    pub fn process_video(&self, video: &Path) -> anyhow::Result<ProcessedRun> {
        let metadata = run_context::create_run(&self.config.output_root, video)?;
        let mut run = PipelineRun::new(metadata.run_id.clone(), video);
        let output_dir = metadata.output_dir;
        run.scratch_dirs.push(output_dir.join("frames"));

        tracing::info!("Processing {:?} as run {}", video, run.run_id);

        let processed = match self.drive(&mut run, &output_dir) {
            Ok((summary, batches)) => {
                tracing::info!(
                    "Run {} complete: {}/{} frames analyzed",
                    run.run_id,
                    summary.analyzed_frames,
                    summary.total_frames
                );
                ProcessedRun {
                    run,
                    output_dir,
                    summary: Some(summary),
                    batches: Some(batches),
                }
            }
            Err(e) => {
                tracing::error!("Run {} failed during {}: {}", run.run_id, run.stage(), e);
                if let Err(t) = run.fail(&e) {
                    tracing::warn!("Could not mark run {} failed: {}", run.run_id, t);
                }
                discard_scratch(&run);
                ProcessedRun {
                    run,
                    output_dir,
                    summary: None,
                    batches: None,
                }
            }
        };

        if let Err(e) = finalize::write_run_status(&processed.output_dir, &processed.run.status_report()) {
            tracing::warn!("Failed to write run status for {}: {:#}", processed.run.run_id, e);
        }
        Ok(processed)
    }

    fn enter(&self, run: &mut PipelineRun, stage: PipelineStage) -> Result<(), PipelineError> {
        let previous = run.stage();
        run.advance(stage)?;
        let took = run.stage_durations().get(&previous).copied().unwrap_or_default();
        tracing::info!("[{}] {} -> {} ({:.1}s)", run.run_id, previous, stage, took);
        Ok(())
    }

    fn drive(
        &self,
        run: &mut PipelineRun,
        output_dir: &Path,
    ) -> Result<(Summary, BatchReport), PipelineError> {
        self.enter(run, PipelineStage::MetadataExtraction)?;
        let probe = self.extractor.probe(&run.video)?;
        tracing::info!(
            "[{}] {}x{} at {:.2} fps, {:.0}s of footage",
            run.run_id,
            probe.width,
            probe.height,
            probe.fps,
            probe.duration_secs()
        );
        let trace = self.track_logs.load_track_log(&run.video)?;
        trace.start()?;

        self.enter(run, PipelineStage::FrameExtraction)?;
        let frames_dir = output_dir.join("frames");
        let frames =
            self.extractor
                .extract_frames(&run.video, &probe, &self.config.extraction, &frames_dir)?;
        let video = run.video.clone();
        run.records = frames
            .iter()
            .map(|f| FrameRecord::from_extracted(f, &video))
            .collect();

        self.enter(run, PipelineStage::Correlation)?;
        correlate(&trace, &mut run.records)?;

        self.enter(run, PipelineStage::Analysis)?;
        let coordinator = BatchCoordinator::new(self.config.batch.clone())?
            .with_progress(self.config.show_progress);
        let batches = coordinator.run_batches(&mut run.records, Arc::clone(&self.analyzer))?;
        if batches.shortfall() > 0 {
            tracing::warn!(
                "[{}] {} of {} frames left unanalyzed",
                run.run_id,
                batches.shortfall(),
                batches.submitted_frames
            );
        }

        self.enter(run, PipelineStage::Finalization)?;
        if let Some(archive) = &self.archive {
            let archived = archive_records(archive.as_ref(), &mut run.records);
            tracing::info!("[{}] Archived {} frames", run.run_id, archived);
        }
        let summary = summarize(
            &run.records,
            &self.config.health_buckets,
            self.config.flag_confidence_threshold,
        );
        let features = to_feature_collection(&run.records)?;
        let frames_per_second = match self.config.extraction.mode {
            ExtractionMode::Sampled => self.config.extraction.sample_rate,
            ExtractionMode::AllFrames => 1.0 / self.config.extraction.seconds_per_frame,
        };
        let overview = Overview {
            run_id: &run.run_id,
            summary: &summary,
            batches: &batches,
            coverage: Coverage::new(summary.analyzed_frames, frames_per_second),
            feature_count: features.len(),
            route_length_m: features.route_length_m(),
        };
        finalize::write_run_artifacts(output_dir, &run.records, &features, &overview)
            .map_err(|e| PipelineError::Artifacts(format!("{:#}", e)))?;

        self.enter(run, PipelineStage::Complete)?;
        Ok((summary, batches))
    }
}

fn discard_scratch(run: &PipelineRun) {
    for dir in &run.scratch_dirs {
        if dir.exists() {
            match fs::remove_dir_all(dir) {
                Ok(()) => tracing::info!("Removed partial artifacts {:?}", dir),
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", dir, e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::tests::road;
    use crate::analysis::{BatchItem, FrameAnalysis};
    use crate::config::{AnalysisSchema, ExtractionSettings};
    use crate::error::{BatchAnalysisError, ExtractionError, TelemetryError};
    use crate::pipeline::run_state::RunFailure;
    use crate::telemetry::tests::SAMPLE_GPX;
    use crate::telemetry::TelemetryTrace;
    use crate::video::{ExtractedFrame, VideoProbe};

    /// Writes `count` stills two seconds apart.
    pub(crate) struct FakeExtractor {
        pub count: usize,
        pub fail: bool,
    }

    impl FrameExtractor for FakeExtractor {
        fn probe(&self, _video: &Path) -> Result<VideoProbe, ExtractionError> {
            Ok(VideoProbe {
                width: 640,
                height: 480,
                fps: 30.0,
                frame_count: self.count * 60,
            })
        }

        fn extract_frames(
            &self,
            video: &Path,
            _probe: &VideoProbe,
            _settings: &ExtractionSettings,
            output_dir: &Path,
        ) -> Result<Vec<ExtractedFrame>, ExtractionError> {
            fs::create_dir_all(output_dir)?;
            let stem = video.file_stem().unwrap().to_string_lossy().into_owned();
            let mut frames = Vec::new();
            for i in 0..self.count {
                let path = output_dir.join(format!("{}_{:04}.jpg", stem, i + 1));
                fs::write(&path, b"jpeg")?;
                frames.push(ExtractedFrame {
                    artifact_path: path,
                    relative_timestamp_secs: i as f64 * 2.0,
                });
            }
            if self.fail {
                return Err(ExtractionError::ExecutionFailed {
                    binary: "ffmpeg".to_string(),
                    exit_code: Some(1),
                    stderr: "decode error".to_string(),
                });
            }
            Ok(frames)
        }
    }

    pub(crate) struct FixedTrackLog(pub Option<&'static str>);

    impl TrackLogProvider for FixedTrackLog {
        fn load_track_log(&self, video: &Path) -> Result<TelemetryTrace, TelemetryError> {
            match self.0 {
                Some(gpx) => TelemetryTrace::parse_str(gpx),
                None => Err(TelemetryError::NoTelemetry(video.to_path_buf())),
            }
        }
    }

    pub(crate) fn healthy_analyzer() -> Arc<dyn AnalysisService> {
        Arc::new(
            |batch: &[BatchItem]| -> Result<Vec<FrameAnalysis>, BatchAnalysisError> {
                Ok(batch
                    .iter()
                    .map(|item| FrameAnalysis {
                        id: item.id.clone(),
                        payload: road(70, 0.95),
                        external_file_id: None,
                    })
                    .collect())
            },
        )
    }

    pub(crate) fn pipeline(
        output_root: &Path,
        extractor: FakeExtractor,
        track_log: FixedTrackLog,
        analyzer: Arc<dyn AnalysisService>,
    ) -> Pipeline {
        let mut config = PipelineConfig::new(output_root.to_path_buf(), AnalysisSchema::RoadCondition);
        config.batch.batch_size = 2;
        config.batch.max_concurrent_batches = 2;
        Pipeline::new(config, Arc::new(extractor), Arc::new(track_log), analyzer).unwrap()
    }

    #[test]
    fn test_process_video_end_to_end() {
        let out = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            out.path(),
            FakeExtractor { count: 5, fail: false },
            FixedTrackLog(Some(SAMPLE_GPX)),
            healthy_analyzer(),
        );

        let processed = pipeline.process_video(Path::new("/videos/drive.mp4")).unwrap();
        assert!(processed.is_complete());
        assert_eq!(processed.run.history().len(), 7);

        let summary = processed.summary.as_ref().unwrap();
        assert_eq!(summary.analyzed_frames, 5);
        assert_eq!(summary.flagged_frames.len(), 5);
        assert_eq!(processed.batches.as_ref().unwrap().total_batches, 3);

        for artifact in [
            finalize::FRAMES_JSON,
            finalize::FRAMES_CSV,
            finalize::FRAMES_GEOJSON,
            finalize::OVERVIEW_JSON,
            finalize::RUN_STATUS_JSON,
        ] {
            assert!(processed.output_dir.join(artifact).exists(), "missing {}", artifact);
        }
        let overview: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(processed.output_dir.join(finalize::OVERVIEW_JSON)).unwrap(),
        )
        .unwrap();
        assert_eq!(overview["feature_count"], 5);
        assert_eq!(overview["coverage"]["seconds"], 10.0);
    }

    #[test]
    fn test_failed_batches_do_not_fail_the_run() {
        let out = tempfile::tempdir().unwrap();
        let failing: Arc<dyn AnalysisService> = Arc::new(
            |_batch: &[BatchItem]| -> Result<Vec<FrameAnalysis>, BatchAnalysisError> {
                Err(BatchAnalysisError::Service("unavailable".to_string()))
            },
        );
        let pipeline = pipeline(
            out.path(),
            FakeExtractor { count: 3, fail: false },
            FixedTrackLog(Some(SAMPLE_GPX)),
            failing,
        );

        let processed = pipeline.process_video(Path::new("/videos/drive.mp4")).unwrap();
        assert!(processed.is_complete());
        assert_eq!(processed.summary.as_ref().unwrap().pending_frames, 3);
        assert_eq!(processed.batches.as_ref().unwrap().shortfall(), 3);
    }

    #[test]
    fn test_missing_telemetry_fails_in_metadata_stage() {
        let out = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            out.path(),
            FakeExtractor { count: 3, fail: false },
            FixedTrackLog(None),
            healthy_analyzer(),
        );

        let processed = pipeline.process_video(Path::new("/videos/drive.mp4")).unwrap();
        assert_eq!(processed.run.stage(), PipelineStage::Failed);
        let failure: &RunFailure = processed.run.failure().unwrap();
        assert_eq!(failure.stage, PipelineStage::MetadataExtraction);
        assert!(failure.error.contains("no track log"));
        assert!(processed.output_dir.join(finalize::RUN_STATUS_JSON).exists());
        assert!(!processed.output_dir.join(finalize::FRAMES_JSON).exists());
    }

    #[test]
    fn test_extraction_failure_discards_partial_frames() {
        let out = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            out.path(),
            FakeExtractor { count: 3, fail: true },
            FixedTrackLog(Some(SAMPLE_GPX)),
            healthy_analyzer(),
        );

        let processed = pipeline.process_video(Path::new("/videos/drive.mp4")).unwrap();
        assert_eq!(
            processed.run.failure().map(|f| f.stage),
            Some(PipelineStage::FrameExtraction)
        );
        assert!(!processed.output_dir.join("frames").exists());
    }
}
