//! Batch engine: a fixed pool of workers pulls workbook paths from a shared queue and reports one
//! [`WorkResult`] per file to a single aggregator.
//!
//! The aggregator is the only writer of progress state. Observers read it through
//! [`BatchContext`] snapshots.

use crate::collect::collect_target_files;
use crate::config::SweepConfig;
use crate::errors::{BatchError, FileError, InvalidParamsError};
use crate::locks::{LockReleaser, NoopReleaser, platform_lock_releaser};
use crate::model::{
    BatchOutcome, BatchPhase, BatchStatus, ChangeRecord, ChangeStatus, FileFailure, Job,
    ProgressSnapshot, WorkResult,
};
use crate::mutate::{ScanOutcome, scan};
use crate::paths::{PathNormalizer, platform_normalizer};
use crate::persist::SafeWriter;
use crate::workbook::{SpreadsheetBackend, UmyaBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{self, JoinSet};

pub const DEFAULT_WORKERS: usize = 2;

/// One batch invocation: where to look and what to do.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub root: PathBuf,
    pub search: String,
    pub replace: String,
    pub search_only: bool,
    pub excluded_exts: Vec<String>,
    pub excluded_dir: Option<PathBuf>,
}

impl BatchRequest {
    pub fn from_config(
        config: &SweepConfig,
        search: impl Into<String>,
        replace: impl Into<String>,
        search_only: bool,
    ) -> Self {
        Self {
            root: config.root.clone(),
            search: search.into(),
            replace: replace.into(),
            search_only,
            excluded_exts: config.excluded_exts.clone(),
            excluded_dir: config.excluded_dir.clone(),
        }
    }
}

/// Status channel of the batch a coordinator is running (or last ran).
#[derive(Clone)]
pub struct BatchContext {
    tx: Arc<watch::Sender<BatchStatus>>,
}

impl Default for BatchContext {
    fn default() -> Self {
        let (tx, _) = watch::channel(BatchStatus::default());
        Self { tx: Arc::new(tx) }
    }
}

impl BatchContext {
    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> BatchStatus {
        self.tx.borrow().clone()
    }

    /// Move to Scanning unless a batch is already active. Check and update happen under the
    /// channel's write lock.
    fn try_begin(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tx.send_if_modified(|status| {
            if status.phase.is_active() {
                return false;
            }
            *status = BatchStatus {
                phase: BatchPhase::Scanning,
                message,
                ..BatchStatus::default()
            };
            true
        })
    }

    fn set_phase(&self, phase: BatchPhase, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|status| {
            status.phase = phase;
            status.message = message;
        });
    }

    fn set_progress(&self, progress: &ProgressSnapshot, total_changes: usize) {
        self.tx.send_modify(|status| {
            status.progress = progress.clone();
            status.total_changes = total_changes;
        });
    }

    /// Done and the report path become visible together.
    fn finish(&self, message: String, report_path: Option<PathBuf>) {
        self.tx.send_modify(|status| {
            status.phase = BatchPhase::Done;
            status.message = message;
            status.report_path = report_path;
        });
    }

    fn abandon(&self) {
        self.tx.send_if_modified(|status| {
            if !status.phase.is_active() {
                return false;
            }
            status.phase = BatchPhase::Failed;
            status.message = "batch abandoned before completion".to_string();
            true
        });
    }
}

/// A batch that has claimed its coordinator via [`BatchCoordinator::start`].
///
/// Dropping it before [`BatchCoordinator::complete`] finishes (cancelled task, panic) marks the
/// batch Failed so the coordinator can be claimed again.
pub struct PendingBatch {
    request: BatchRequest,
    context: BatchContext,
}

impl PendingBatch {
    pub fn request(&self) -> &BatchRequest {
        &self.request
    }
}

impl Drop for PendingBatch {
    fn drop(&mut self) {
        self.context.abandon();
    }
}

/// Per-file unit of work shared by every worker of one run.
#[derive(Clone)]
struct FileTask {
    backend: Arc<dyn SpreadsheetBackend>,
    writer: Arc<SafeWriter>,
    normalizer: Arc<dyn PathNormalizer>,
    search: Arc<str>,
    replace: Arc<str>,
    search_only: bool,
}

impl FileTask {
    async fn process(&self, job: Job, worker_index: usize) -> WorkResult {
        let path = job.path.clone();
        let task = self.clone();
        match task::spawn_blocking(move || task.process_blocking(&job.path)).await {
            Ok((changes, error)) => WorkResult {
                path,
                changes,
                error,
                worker_index,
            },
            Err(join) => WorkResult {
                path,
                changes: Vec::new(),
                error: Some(FileError::Worker(join.to_string())),
                worker_index,
            },
        }
    }

    /// Open, scan and (when something changed) save exactly once.
    fn process_blocking(&self, path: &Path) -> (Vec<ChangeRecord>, Option<FileError>) {
        let open_path = self.normalizer.normalize(path);
        let mut handle = match self.backend.open(&open_path) {
            Ok(handle) => handle,
            Err(error) => return (Vec::new(), Some(FileError::Open(format!("{error:#}")))),
        };

        let ScanOutcome { changes, mutated } = scan(
            handle.as_mut(),
            path,
            &self.search,
            &self.replace,
            self.search_only,
        );

        if mutated && !self.search_only {
            if let Err(error) = self.writer.save(handle.as_ref(), path) {
                return (changes, Some(FileError::Save(error.to_string())));
            }
            tracing::debug!(path = %path.display(), cells = changes.len(), "saved workbook");
        }

        (changes, None)
    }
}

/// Folds worker results in arrival order.
#[derive(Default)]
struct Aggregator {
    snapshot: ProgressSnapshot,
    outcome: BatchOutcome,
}

impl Aggregator {
    fn new(total: usize) -> Self {
        Self {
            snapshot: ProgressSnapshot {
                total_count: total,
                ..ProgressSnapshot::default()
            },
            outcome: BatchOutcome::default(),
        }
    }

    fn fold(&mut self, result: WorkResult) {
        let WorkResult {
            path,
            mut changes,
            error,
            worker_index,
        } = result;

        self.snapshot.processed_count += 1;
        *self
            .snapshot
            .per_worker_counts
            .entry(worker_index)
            .or_default() += 1;
        self.snapshot.current_path = path.clone();

        if let Some(error) = error {
            if error.is_save() {
                let message = error.to_string();
                let downgraded = changes
                    .iter_mut()
                    .map(|change| change.downgrade(message.clone()))
                    .filter(|downgraded| *downgraded)
                    .count();
                tracing::warn!(
                    path = %path.display(),
                    downgraded,
                    error = %error,
                    "save failed"
                );
            } else {
                tracing::warn!(path = %path.display(), error = %error, "skipping file");
            }
            self.outcome.file_failures.push(FileFailure { path, error });
        }

        self.outcome.total_count += changes
            .iter()
            .filter(|c| matches!(c.status, ChangeStatus::Found | ChangeStatus::Success))
            .count();
        self.outcome.changes.append(&mut changes);
    }
}

pub struct BatchCoordinator {
    backend: Arc<dyn SpreadsheetBackend>,
    writer: Arc<SafeWriter>,
    normalizer: Arc<dyn PathNormalizer>,
    lock_releaser: Arc<dyn LockReleaser>,
    workers: usize,
    extensions: Vec<String>,
    context: BatchContext,
}

impl BatchCoordinator {
    pub fn new(
        backend: Arc<dyn SpreadsheetBackend>,
        writer: Arc<SafeWriter>,
        normalizer: Arc<dyn PathNormalizer>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            backend,
            writer,
            normalizer,
            lock_releaser: Arc::new(NoopReleaser),
            workers: DEFAULT_WORKERS,
            extensions,
            context: BatchContext::default(),
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        let normalizer = platform_normalizer();
        let writer = Arc::new(SafeWriter::new(&config.scratch_dir, normalizer.clone()));
        let lock_releaser = if config.lock_release {
            platform_lock_releaser()
        } else {
            Arc::new(NoopReleaser)
        };
        Self::new(
            Arc::new(UmyaBackend),
            writer,
            normalizer,
            config.extensions.clone(),
        )
        .with_workers(config.workers)
        .with_lock_releaser(lock_releaser)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_lock_releaser(mut self, releaser: Arc<dyn LockReleaser>) -> Self {
        self.lock_releaser = releaser;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn status(&self) -> BatchStatus {
        self.context.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStatus> {
        self.context.subscribe()
    }

    /// Claim the coordinator for `request`. Fails with [`BatchError::Busy`] while another batch
    /// is active, including one that is still writing its report.
    pub fn start(&self, request: BatchRequest) -> Result<PendingBatch, BatchError> {
        ensure_search(&request.search)?;
        if !self.context.try_begin(format!("scanning {}", request.root.display())) {
            return Err(BatchError::Busy);
        }
        Ok(PendingBatch {
            request,
            context: self.context.clone(),
        })
    }

    /// Collect, release locks, then process every collected workbook.
    pub async fn run_batch<F>(
        &self,
        request: &BatchRequest,
        on_progress: F,
    ) -> Result<BatchOutcome, BatchError>
    where
        F: FnMut(&ProgressSnapshot) + Send,
    {
        let pending = self.start(request.clone())?;
        self.complete(pending, on_progress, |_| None).await
    }

    /// Run a started batch to the end and hand its outcome to `report`.
    ///
    /// The batch stays in [`BatchPhase::Reporting`] while `report` runs; the path it returns is
    /// published in the same update that marks the batch Done.
    pub async fn complete<F, R>(
        &self,
        pending: PendingBatch,
        on_progress: F,
        report: R,
    ) -> Result<BatchOutcome, BatchError>
    where
        F: FnMut(&ProgressSnapshot) + Send,
        R: FnOnce(&BatchOutcome) -> Option<PathBuf> + Send,
    {
        let request = pending.request();
        let files = self.collect(request).await?;

        if !files.is_empty() {
            if let Err(error) = self.lock_releaser.release().await {
                tracing::warn!(
                    releaser = self.lock_releaser.name(),
                    error = %error,
                    "failed to release workbook locks"
                );
            }
        }

        let (outcome, summary) = self
            .drive(
                files,
                &request.search,
                &request.replace,
                request.search_only,
                on_progress,
            )
            .await?;

        self.context.set_phase(BatchPhase::Reporting, "writing report");
        let report_path = report(&outcome);
        self.context.finish(summary, report_path);
        Ok(outcome)
    }

    async fn collect(&self, request: &BatchRequest) -> Result<Vec<PathBuf>, BatchError> {
        let root = request.root.clone();
        let extensions = self.extensions.clone();
        let excluded_exts = request.excluded_exts.clone();
        let excluded_dir = request.excluded_dir.clone();
        let collected = task::spawn_blocking(move || {
            collect_target_files(&root, &extensions, &excluded_exts, excluded_dir.as_deref())
        })
        .await;

        match collected {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(error)) => {
                self.context.set_phase(BatchPhase::Failed, error.to_string());
                Err(error.into())
            }
            Err(join) => {
                self.context.set_phase(BatchPhase::Failed, join.to_string());
                Err(join.into())
            }
        }
    }

    /// Process `files` with the worker pool. Save failures do not make this an `Err`; they are
    /// reported through [`BatchOutcome::error`] alongside the full change list.
    ///
    /// Unlike [`run_batch`](Self::run_batch) this does not claim the coordinator.
    pub async fn run<F>(
        &self,
        files: Vec<PathBuf>,
        search: &str,
        replace: &str,
        search_only: bool,
        on_progress: F,
    ) -> Result<BatchOutcome, BatchError>
    where
        F: FnMut(&ProgressSnapshot) + Send,
    {
        ensure_search(search)?;
        let (outcome, summary) = self
            .drive(files, search, replace, search_only, on_progress)
            .await?;
        self.context.set_phase(BatchPhase::Done, summary);
        Ok(outcome)
    }

    /// Everything up to, but not including, Done. Returns the outcome and its summary line.
    async fn drive<F>(
        &self,
        files: Vec<PathBuf>,
        search: &str,
        replace: &str,
        search_only: bool,
        mut on_progress: F,
    ) -> Result<(BatchOutcome, String), BatchError>
    where
        F: FnMut(&ProgressSnapshot) + Send,
    {
        let dispatched = files.len();
        let started = Instant::now();

        let mut aggregator = Aggregator::new(dispatched);
        self.context.set_progress(&aggregator.snapshot, 0);
        if dispatched == 0 {
            return Ok((aggregator.outcome, "no workbooks found".to_string()));
        }

        self.context.set_phase(
            BatchPhase::Dispatching,
            format!("dispatching {dispatched} files"),
        );
        tracing::info!(
            files = dispatched,
            workers = self.workers,
            search_only,
            "batch started"
        );

        let (job_tx, job_rx) = mpsc::channel::<Job>(dispatched);
        let (result_tx, mut result_rx) = mpsc::channel::<WorkResult>(self.workers);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let file_task = FileTask {
            backend: self.backend.clone(),
            writer: self.writer.clone(),
            normalizer: self.normalizer.clone(),
            search: Arc::from(search),
            replace: Arc::from(replace),
            search_only,
        };

        let mut pool = JoinSet::new();
        for worker_index in 0..self.workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let file_task = file_task.clone();
            pool.spawn(async move {
                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some(job) = next else { break };
                    let result = file_task.process(job, worker_index).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        // Workers hold the only remaining senders: the stream ends once all of them exit.
        drop(result_tx);

        for path in files {
            if job_tx.send(Job { path }).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        self.context.set_phase(BatchPhase::Draining, "processing");
        while let Some(result) = result_rx.recv().await {
            aggregator.fold(result);
            on_progress(&aggregator.snapshot);
            self.context
                .set_progress(&aggregator.snapshot, aggregator.outcome.total_count);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(error) = joined {
                tracing::error!(error = %error, "worker task failed");
            }
        }

        let processed = aggregator.snapshot.processed_count;
        if processed != dispatched {
            let error = BatchError::Incomplete {
                processed,
                dispatched,
            };
            self.context.set_phase(BatchPhase::Failed, error.to_string());
            return Err(error);
        }

        let outcome = aggregator.outcome;
        let summary = format!(
            "processed {} files, {} matches, {} file errors",
            processed,
            outcome.total_count,
            outcome.file_failures.len()
        );
        tracing::info!(
            files = processed,
            matches = outcome.total_count,
            file_errors = outcome.file_failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok((outcome, summary))
    }
}

fn ensure_search(search: &str) -> Result<(), BatchError> {
    if search.is_empty() {
        return Err(InvalidParamsError::new("run_batch", "search text must not be empty")
            .with_field("search")
            .into());
    }
    Ok(())
}
