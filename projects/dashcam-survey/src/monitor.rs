// Polls the video root and feeds new recordings through the pipeline
//
// Videos run one at a time on the blocking pool. A failed video is logged
// and left in place for the next poll; a completed one goes in the
// processed log and is never picked up again.

use crate::pipeline::finalize;
use crate::pipeline::orchestrator::Pipeline;
use crate::run_context::{list_videos, ProcessedLog};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub video_root: PathBuf,
    pub processed_log: PathBuf,
    pub poll_interval: Duration,
    /// Process whatever is present once and return
    pub once: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub completed: usize,
    pub failed: usize,
}

/// Processes every unprocessed video under the root once.
pub async fn poll_once(
    pipeline: &Arc<Pipeline>,
    video_root: &Path,
    log: &mut ProcessedLog,
) -> Result<PollStats> {
    let mut stats = PollStats::default();
    let pending: Vec<PathBuf> = list_videos(video_root)
        .into_iter()
        .filter(|v| !log.contains(v))
        .collect();
    if pending.is_empty() {
        tracing::debug!("No new videos under {:?}", video_root);
        return Ok(stats);
    }
    tracing::info!("Found {} new videos", pending.len());

    for video in pending {
        let worker = Arc::clone(pipeline);
        let path = video.clone();
        let result = tokio::task::spawn_blocking(move || worker.process_video(&path)).await;

        match result {
            Ok(Ok(processed)) if processed.is_complete() => {
                log.record(&video)?;
                stats.completed += 1;
            }
            Ok(Ok(processed)) => {
                stats.failed += 1;
                tracing::warn!(
                    "{:?} did not complete ({}), will retry on the next poll",
                    video,
                    processed.run.status
                );
            }
            Ok(Err(e)) => {
                stats.failed += 1;
                tracing::error!("Could not start a run for {:?}: {:#}", video, e);
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!("Processing task for {:?} panicked: {}", video, e);
            }
        }
    }

    if stats.completed > 0 {
        let output_root = pipeline.config().output_root.clone();
        match tokio::task::spawn_blocking(move || finalize::combine_feature_collections(&output_root)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Failed to combine feature collections: {:#}", e),
            Err(e) => tracing::warn!("Combine task panicked: {}", e),
        }
    }

    tracing::info!(
        "Poll finished: {} completed, {} failed",
        stats.completed,
        stats.failed
    );
    Ok(stats)
}

/// Runs until Ctrl-C, or after a single poll when `once` is set.
pub async fn run_monitor(pipeline: Arc<Pipeline>, options: MonitorOptions) -> Result<()> {
    let mut log = ProcessedLog::open(&options.processed_log)?;
    tracing::info!(
        "Watching {:?} every {}s ({} videos already processed)",
        options.video_root,
        options.poll_interval.as_secs(),
        log.len()
    );

    let mut ticker = tokio::time::interval(options.poll_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
        }

        poll_once(&pipeline, &options.video_root, &mut log).await?;

        if options.once {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::orchestrator::tests::{healthy_analyzer, pipeline, FakeExtractor, FixedTrackLog};
    use crate::telemetry::tests::SAMPLE_GPX;
    use std::fs;

    #[tokio::test]
    async fn test_poll_once_processes_new_videos_only() {
        let videos = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(videos.path().join("drive_a.mp4"), b"").unwrap();
        fs::write(videos.path().join("drive_b.mp4"), b"").unwrap();

        let pipeline = Arc::new(pipeline(
            out.path(),
            FakeExtractor { count: 2, fail: false },
            FixedTrackLog(Some(SAMPLE_GPX)),
            healthy_analyzer(),
        ));
        let log_path = out.path().join("processed_videos.log");
        let mut log = ProcessedLog::open(&log_path).unwrap();
        let root = videos.path();

        let stats = poll_once(&pipeline, root, &mut log).await.unwrap();
        assert_eq!(stats, PollStats { completed: 2, failed: 0 });
        assert!(out.path().join(finalize::COMBINED_GEOJSON).exists());

        let again = poll_once(&pipeline, root, &mut log).await.unwrap();
        assert_eq!(again, PollStats::default());
    }

    #[tokio::test]
    async fn test_failed_videos_stay_unprocessed() {
        let videos = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(videos.path().join("no_gps.mp4"), b"").unwrap();

        let pipeline = Arc::new(pipeline(
            out.path(),
            FakeExtractor { count: 2, fail: false },
            FixedTrackLog(None),
            healthy_analyzer(),
        ));
        let mut log = ProcessedLog::open(&out.path().join("processed_videos.log")).unwrap();

        let stats = poll_once(&pipeline, videos.path(), &mut log)
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert!(log.is_empty());
        assert!(videos.path().join("no_gps.mp4").exists());
    }

    #[tokio::test]
    async fn test_run_monitor_once_returns() {
        let videos = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline(
            out.path(),
            FakeExtractor { count: 1, fail: false },
            FixedTrackLog(Some(SAMPLE_GPX)),
            healthy_analyzer(),
        ));
        let options = MonitorOptions {
            video_root: videos.path().to_path_buf(),
            processed_log: out.path().join("processed_videos.log"),
            poll_interval: Duration::from_millis(10),
            once: true,
        };
        run_monitor(pipeline, options).await.unwrap();
    }
}
