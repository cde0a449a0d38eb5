// Error taxonomy for the survey pipeline
//
// Stage-fatal errors (telemetry, extraction, assembly) drive a run to Failed.
// Batch errors are recovered inside the coordinator and only show up as a
// shortfall in the analyzed count.

use crate::pipeline::run_state::PipelineStage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry trace is empty")]
    EmptyTrace,

    #[error("failed to parse track log: {0}")]
    Parse(String),

    #[error("no track log found for {}", .0.display())]
    NoTelemetry(PathBuf),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{binary} could not be started: {source}")]
    NotFound {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} failed with exit code {exit_code:?}: {stderr}")]
    ExecutionFailed {
        binary: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse probe output: {0}")]
    Probe(String),

    #[error("cropping {crop_top}px leaves no rows in a {height}px frame")]
    InvalidCrop { crop_top: u32, height: u32 },

    #[error("video not found: {}", .0.display())]
    VideoNotFound(PathBuf),

    #[error("no frames extracted from {}", .0.display())]
    NoFrames(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        from: PipelineStage,
        to: PipelineStage,
    },

    #[error("run already ended in {0}")]
    TerminalState(PipelineStage),
}

#[derive(Debug, Error)]
pub enum BatchAnalysisError {
    #[error("analysis service error: {0}")]
    Service(String),

    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),

    /// The response left some frames of the batch without a result.
    #[error("analysis returned results for {returned} of {expected} frames")]
    PartialResults { returned: usize, expected: usize },

    #[error("analysis call ended without a result")]
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("analyzed frame {0} has no coordinates")]
    MissingCoordinates(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    BatchAnalysis(#[from] BatchAnalysisError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to write run artifacts: {0}")]
    Artifacts(String),

    #[error("frame {0} appears more than once in the run")]
    DuplicateFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_messages_name_stages() {
        let err = TransitionError::InvalidTransition {
            from: PipelineStage::Queued,
            to: PipelineStage::Analysis,
        };
        assert_eq!(err.to_string(), "cannot move from queued to analysis");

        let err = PipelineError::from(TransitionError::TerminalState(PipelineStage::Complete));
        assert_eq!(err.to_string(), "run already ended in complete");
    }
}
