// Analysis service backed by an external program
//
// The program receives `{"schema": ..., "frames": [{"id", "artifact_path"}]}`
// on stdin and must print `{"analyses": [{"file_id": ..., ...}]}` on stdout.

use super::{decode_analyses, AnalysisService, BatchItem, FrameAnalysis};
use crate::config::AnalysisSchema;
use crate::error::BatchAnalysisError;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Cap on captured stdout/stderr per call (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Serialize)]
struct AnalysisRequest<'a> {
    schema: AnalysisSchema,
    frames: &'a [BatchItem],
}

pub struct CommandAnalyzer {
    program: PathBuf,
    args: Vec<String>,
    schema: AnalysisSchema,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        schema: AnalysisSchema,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            schema,
            timeout,
        }
    }

    /// Runs the program once on a private current-thread runtime.
    fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, BatchAnalysisError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BatchAnalysisError::Service(format!("failed to start runtime: {}", e)))?;
        runtime.block_on(self.run_child(input))
    }

    /// Feeds `input` on stdin and collects stdout. The child is killed when
    /// it outlives the timeout.
    async fn run_child(&self, input: Vec<u8>) -> Result<Vec<u8>, BatchAnalysisError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BatchAnalysisError::Service(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&input).await;
            }
        });
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        // Dropping `child` on timeout kills it
        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(BatchAnalysisError::Service(e.to_string())),
            Err(_elapsed) => return Err(BatchAnalysisError::Timeout(self.timeout)),
        };

        let _ = writer.await;
        let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (stderr, _) = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(BatchAnalysisError::Service(format!(
                "{} exited with code {:?}: {}",
                self.program.display(),
                status.code(),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        if stdout_truncated {
            return Err(BatchAnalysisError::MalformedResponse(format!(
                "output exceeds {} bytes",
                MAX_OUTPUT_BYTES
            )));
        }
        Ok(stdout)
    }
}

impl AnalysisService for CommandAnalyzer {
    fn analyze(&self, batch: &[BatchItem]) -> Result<Vec<FrameAnalysis>, BatchAnalysisError> {
        let request = serde_json::to_vec(&AnalysisRequest {
            schema: self.schema,
            frames: batch,
        })
        .map_err(|e| BatchAnalysisError::Service(e.to_string()))?;

        let started = Instant::now();
        let body = self.run(request)?;
        tracing::debug!(
            "Analyzer returned {} bytes for {} frames in {:.1}s",
            body.len(),
            batch.len(),
            started.elapsed().as_secs_f64()
        );
        decode_analyses(self.schema, &body)
    }
}

/// Reads up to the cap, then drains the rest so the child never blocks on a
/// full pipe. The flag reports whether anything was discarded.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut truncated = false;
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
        if let Ok(rest) = tokio::io::copy(&mut h, &mut tokio::io::sink()).await {
            truncated = rest > 0;
        }
    }
    (buf, truncated)
}
