// Per-video stage tracking
//
// Pure state: transitions are validated and timestamped here, cleanup and
// other side effects belong to the orchestrator.

use crate::error::TransitionError;
use crate::pipeline::types::FrameRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Queued,
    MetadataExtraction,
    FrameExtraction,
    Correlation,
    Analysis,
    Finalization,
    Complete,
    Failed,
}

impl PipelineStage {
    /// The immediate forward step, `None` for terminal stages.
    pub fn successor(self) -> Option<PipelineStage> {
        use PipelineStage::*;
        match self {
            Queued => Some(MetadataExtraction),
            MetadataExtraction => Some(FrameExtraction),
            FrameExtraction => Some(Correlation),
            Correlation => Some(Analysis),
            Analysis => Some(Finalization),
            Finalization => Some(Complete),
            Complete | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Complete | PipelineStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Queued => "queued",
            PipelineStage::MetadataExtraction => "metadata_extraction",
            PipelineStage::FrameExtraction => "frame_extraction",
            PipelineStage::Correlation => "correlation",
            PipelineStage::Analysis => "analysis",
            PipelineStage::Finalization => "finalization",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
        }
    }

    fn status_text(self) -> &'static str {
        match self {
            PipelineStage::Queued => "Waiting to start",
            PipelineStage::MetadataExtraction => "Reading video metadata",
            PipelineStage::FrameExtraction => "Extracting frames",
            PipelineStage::Correlation => "Matching frames to GPS",
            PipelineStage::Analysis => "Analyzing frames",
            PipelineStage::Finalization => "Writing results",
            PipelineStage::Complete => "Completed",
            PipelineStage::Failed => "Failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: PipelineStage,
    pub entered_at: DateTime<Utc>,
}

/// The error that ended a run and where it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: PipelineStage,
    pub error: String,
}

/// Serializable view of a run, persisted in the overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub video: PathBuf,
    pub stage: PipelineStage,
    pub status: String,
    pub failure: Option<RunFailure>,
    pub history: Vec<StageTransition>,
    pub stage_durations_secs: BTreeMap<PipelineStage, f64>,
}

/// One video's trip through the pipeline.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub video: PathBuf,
    pub status: String,
    pub records: Vec<FrameRecord>,
    /// Intermediate outputs discarded if the run fails
    pub scratch_dirs: Vec<PathBuf>,
    stage: PipelineStage,
    failure: Option<RunFailure>,
    history: Vec<StageTransition>,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>, video: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            video: video.into(),
            status: PipelineStage::Queued.status_text().to_string(),
            records: Vec::new(),
            scratch_dirs: Vec::new(),
            stage: PipelineStage::Queued,
            failure: None,
            history: vec![StageTransition {
                stage: PipelineStage::Queued,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    /// Moves to `next`, which must be the immediate successor or `Failed`.
    pub fn advance(&mut self, next: PipelineStage) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError::TerminalState(self.stage));
        }
        if next == PipelineStage::Failed {
            return self.fail("run aborted");
        }
        if self.stage.successor() != Some(next) {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.enter(next);
        Ok(())
    }

    /// Records `error` against the current stage and moves to `Failed`.
    pub fn fail(&mut self, error: impl fmt::Display) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError::TerminalState(self.stage));
        }
        self.failure = Some(RunFailure {
            stage: self.stage,
            error: error.to_string(),
        });
        self.enter(PipelineStage::Failed);
        Ok(())
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.status = match (&self.failure, stage) {
            (Some(failure), PipelineStage::Failed) => {
                format!("Failed during {}: {}", failure.stage, failure.error)
            }
            _ => stage.status_text().to_string(),
        };
        self.history.push(StageTransition {
            stage,
            entered_at: Utc::now(),
        });
    }

    /// Wall time spent in each stage that has been left.
    pub fn stage_durations(&self) -> BTreeMap<PipelineStage, f64> {
        self.history
            .windows(2)
            .map(|pair| {
                let elapsed = pair[1].entered_at - pair[0].entered_at;
                (pair[0].stage, elapsed.num_milliseconds() as f64 / 1000.0)
            })
            .collect()
    }

    pub fn status_report(&self) -> RunStatus {
        RunStatus {
            run_id: self.run_id.clone(),
            video: self.video.clone(),
            stage: self.stage,
            status: self.status.clone(),
            failure: self.failure.clone(),
            history: self.history.clone(),
            stage_durations_secs: self.stage_durations(),
        }
    }
}
