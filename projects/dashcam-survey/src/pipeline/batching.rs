// Batch dispatch and reconciliation
//
// Batches sit in a shared queue drained by a fixed number of worker threads.
// Each analysis call runs on its own thread with a one-shot result channel so
// a hung call is reported as timed out without waiting for it. The worker
// keeps its slot until that call actually returns, so in-flight calls never
// exceed the worker count. Outcomes flow back over a channel to a single
// reconciliation loop, the only writer of frame records.

use crate::analysis::{AnalysisService, BatchItem, FrameAnalysis};
use crate::config::BatchSettings;
use crate::error::{BatchAnalysisError, PipelineError};
use crate::pipeline::types::{AnalysisState, FrameRecord};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub frame_ids: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total_batches: usize,
    pub succeeded_batches: usize,
    pub submitted_frames: usize,
    /// Records that went from pending to analyzed during this run
    pub analyzed_frames: usize,
    /// Batches that errored, timed out, or came back without a result for
    /// every member; none of their records were updated
    pub failed_batches: Vec<BatchFailure>,
    pub unmatched_results: usize,
    pub duplicate_results: usize,
}

impl BatchReport {
    /// Submitted frames still pending after reconciliation.
    pub fn shortfall(&self) -> usize {
        self.submitted_frames.saturating_sub(self.analyzed_frames)
    }
}

struct BatchOutcome {
    index: usize,
    ids: Vec<String>,
    result: Result<Vec<FrameAnalysis>, BatchAnalysisError>,
    elapsed: Duration,
}

/// Splits the not-yet-submitted records into consecutive batches of
/// `batch_size`, preserving order, and marks them dispatched.
///
/// Results come back keyed by file name, so two records sharing one are
/// rejected before anything is dispatched.
pub fn partition(
    records: &mut [FrameRecord],
    batch_size: usize,
) -> Result<Vec<Batch>, PipelineError> {
    let mut names = HashSet::with_capacity(records.len());
    if let Some(dup) = records.iter().find(|r| !names.insert(r.filename.as_str())) {
        return Err(PipelineError::DuplicateFrame(dup.filename.clone()));
    }

    let size = batch_size.max(1);
    let eligible: Vec<&mut FrameRecord> = records
        .iter_mut()
        .filter(|r| !r.dispatched && !r.is_analyzed())
        .collect();

    let mut batches: Vec<Batch> = Vec::with_capacity(eligible.len().div_ceil(size));
    for record in eligible {
        record.dispatched = true;
        match batches.last_mut() {
            Some(batch) if batch.items.len() < size => batch.items.push(record.batch_item()),
            _ => batches.push(Batch {
                index: batches.len(),
                items: vec![record.batch_item()],
            }),
        }
    }
    Ok(batches)
}

/// Applies one result to its record. A record that is already analyzed is
/// left untouched and `false` is returned.
pub fn apply_analysis(record: &mut FrameRecord, analysis: FrameAnalysis) -> bool {
    if record.is_analyzed() {
        return false;
    }
    record.analysis = AnalysisState::Complete(analysis.payload);
    if analysis.external_file_id.is_some() {
        record.external_analysis_file_id = analysis.external_file_id;
    }
    true
}

/// Owns the records for the duration of a dispatch and folds outcomes into them.
struct Reconciler<'a> {
    records: &'a mut [FrameRecord],
    by_id: HashMap<String, usize>,
    report: BatchReport,
}

impl<'a> Reconciler<'a> {
    fn new(records: &'a mut [FrameRecord]) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.filename.clone(), pos))
            .collect();
        Self {
            records,
            by_id,
            report: BatchReport::default(),
        }
    }

    fn fail(&mut self, outcome: BatchOutcome, error: BatchAnalysisError) {
        tracing::warn!(
            "Batch {} failed after {:.1}s, {} frames stay pending: {}",
            outcome.index,
            outcome.elapsed.as_secs_f64(),
            outcome.ids.len(),
            error
        );
        self.report.failed_batches.push(BatchFailure {
            batch_index: outcome.index,
            frame_ids: outcome.ids,
            error: error.to_string(),
        });
    }

    fn apply(&mut self, mut outcome: BatchOutcome) {
        let analyses = match std::mem::replace(&mut outcome.result, Ok(Vec::new())) {
            Ok(analyses) => analyses,
            Err(e) => return self.fail(outcome, e),
        };

        // First result per member wins; anything else is counted and dropped
        let mut matched: HashMap<String, FrameAnalysis> =
            HashMap::with_capacity(outcome.ids.len());
        for analysis in analyses {
            if !outcome.ids.contains(&analysis.id) || !self.by_id.contains_key(&analysis.id) {
                tracing::warn!(
                    "Batch {} returned a result for {} which it did not contain",
                    outcome.index,
                    analysis.id
                );
                self.report.unmatched_results += 1;
            } else if matched.contains_key(&analysis.id) {
                self.report.duplicate_results += 1;
            } else {
                matched.insert(analysis.id.clone(), analysis);
            }
        }

        if matched.len() < outcome.ids.len() {
            let error = BatchAnalysisError::PartialResults {
                returned: matched.len(),
                expected: outcome.ids.len(),
            };
            return self.fail(outcome, error);
        }

        self.report.succeeded_batches += 1;
        let mut applied = 0;
        for (id, analysis) in matched {
            if let Some(&pos) = self.by_id.get(&id) {
                if apply_analysis(&mut self.records[pos], analysis) {
                    self.report.analyzed_frames += 1;
                    applied += 1;
                }
            }
        }

        tracing::debug!(
            "Batch {} reconciled in {:.1}s: {} frames updated",
            outcome.index,
            outcome.elapsed.as_secs_f64(),
            applied
        );
    }

    fn finish(self) -> BatchReport {
        self.report
    }
}

pub struct BatchCoordinator {
    settings: BatchSettings,
    show_progress: bool,
}

impl BatchCoordinator {
    pub fn new(settings: BatchSettings) -> Result<Self, PipelineError> {
        settings.validate()?;
        Ok(Self {
            settings,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Sends every pending, undispatched record through `analyzer` and writes
    /// the results back onto `records`. Failed batches never abort the run.
    pub fn run_batches(
        &self,
        records: &mut [FrameRecord],
        analyzer: Arc<dyn AnalysisService>,
    ) -> Result<BatchReport, PipelineError> {
        let batches = partition(records, self.settings.batch_size)?;
        let total_batches = batches.len();
        let submitted_frames: usize = batches.iter().map(|b| b.items.len()).sum();

        if total_batches == 0 {
            tracing::info!("No pending frames to analyze");
            return Ok(BatchReport::default());
        }

        let workers = self.settings.max_concurrent_batches.min(total_batches);
        tracing::info!(
            "Dispatching {} frames in {} batches with {} workers",
            submitted_frames,
            total_batches,
            workers
        );

        let pb = self.progress_bar(total_batches);
        let pool = Mutex::new(VecDeque::from(batches));
        let (tx, rx) = channel::unbounded::<BatchOutcome>();
        let mut reconciler = Reconciler::new(records);

        thread::scope(|s| {
            for worker_id in 0..workers {
                let tx = tx.clone();
                let pool = &pool;
                let analyzer = Arc::clone(&analyzer);
                let timeout = self.settings.timeout;
                s.spawn(move || batch_worker(worker_id, pool, analyzer, timeout, tx));
            }
            drop(tx);

            for outcome in rx {
                reconciler.apply(outcome);
                pb.inc(1);
            }
        });
        pb.finish_and_clear();

        let mut report = reconciler.finish();
        report.total_batches = total_batches;
        report.submitted_frames = submitted_frames;

        tracing::info!(
            "Analysis finished: {}/{} frames analyzed, {}/{} batches failed",
            report.analyzed_frames,
            report.submitted_frames,
            report.failed_batches.len(),
            report.total_batches
        );
        Ok(report)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Pops batches from the shared pool until it is empty.
fn batch_worker(
    worker_id: usize,
    pool: &Mutex<VecDeque<Batch>>,
    analyzer: Arc<dyn AnalysisService>,
    timeout: Duration,
    tx: Sender<BatchOutcome>,
) {
    loop {
        let batch = match pool.lock() {
            Ok(mut pool) => pool.pop_front(),
            Err(_) => {
                tracing::error!("Batch worker {}: pool mutex poisoned", worker_id);
                break;
            }
        };
        let Some(batch) = batch else {
            break;
        };

        let ids = batch.items.iter().map(|i| i.id.clone()).collect();
        let start = Instant::now();
        let call = match spawn_call(Arc::clone(&analyzer), batch.items) {
            Ok(call) => call,
            Err(e) => {
                let outcome = BatchOutcome {
                    index: batch.index,
                    ids,
                    result: Err(e),
                    elapsed: start.elapsed(),
                };
                if tx.send(outcome).is_err() {
                    break;
                }
                continue;
            }
        };

        let (result, abandoned) = match call.recv_timeout(timeout) {
            Ok(result) => (result, false),
            Err(RecvTimeoutError::Timeout) => (Err(BatchAnalysisError::Timeout(timeout)), true),
            Err(RecvTimeoutError::Disconnected) => (Err(BatchAnalysisError::Disconnected), false),
        };
        let outcome = BatchOutcome {
            index: batch.index,
            ids,
            result,
            elapsed: start.elapsed(),
        };
        if tx.send(outcome).is_err() {
            break; // Reconciler gone
        }

        if abandoned {
            // The timed-out call still occupies this worker's slot
            let _ = call.recv();
            tracing::debug!(
                "Batch worker {}: abandoned call for batch {} returned after {:.1}s",
                worker_id,
                batch.index,
                start.elapsed().as_secs_f64()
            );
        }
    }
}

/// Starts one analysis call on its own thread. The result arrives on the
/// returned channel; a panicking call disconnects it.
fn spawn_call(
    analyzer: Arc<dyn AnalysisService>,
    items: Vec<BatchItem>,
) -> Result<Receiver<Result<Vec<FrameAnalysis>, BatchAnalysisError>>, BatchAnalysisError> {
    let (tx, rx) = channel::bounded(1);
    thread::Builder::new()
        .name("analysis-call".to_string())
        .spawn(move || {
            let _ = tx.send(analyzer.analyze(&items));
        })
        .map_err(|e| BatchAnalysisError::Service(e.to_string()))?;
    Ok(rx)
}
