use anyhow::Result;
use dashcam_survey::analysis::command::CommandAnalyzer;
use dashcam_survey::cli::Args;
use dashcam_survey::monitor::run_monitor;
use dashcam_survey::pipeline::orchestrator::Pipeline;
use dashcam_survey::storage::LocalArchive;
use dashcam_survey::telemetry::provider::GpxSidecarProvider;
use dashcam_survey::video::ffmpeg::FfmpegExtractor;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let config = args.pipeline_config()?;

    let extractor = FfmpegExtractor::new(&args.ffmpeg, &args.ffprobe);
    let track_logs = GpxSidecarProvider::new(args.track_log_dir.clone());
    let analyzer = CommandAnalyzer::new(
        &args.analyzer,
        args.analyzer_args.clone(),
        args.schema,
        args.analysis_timeout(),
    );

    let mut pipeline = Pipeline::new(
        config,
        Arc::new(extractor),
        Arc::new(track_logs),
        Arc::new(analyzer),
    )?;
    if let Some(dir) = &args.archive_dir {
        tracing::info!("Archiving analyzed frames under {:?}", dir);
        pipeline = pipeline.with_archive(Arc::new(LocalArchive::new(dir)));
    }

    run_monitor(Arc::new(pipeline), args.monitor_options()).await?;

    Ok(())
}
