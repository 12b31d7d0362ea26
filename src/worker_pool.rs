//! Worker pool uploading parts with retry and abort handling
//!
//! Each worker drains the task queue. A part is retried by the worker that
//! received it; once its attempts are exhausted the worker cancels every
//! sibling, aborts the session, and reports the fatal failure.

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::metrics::UploadMetrics;
use crate::models::{CompletedPart, UploadSession, UploadTask};
use crate::storage_client::StorageClient;
use crate::task_queue::TaskReceiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry policy for failed part uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per part, including the first one
    pub max_attempts: usize,
    /// Wait before each retry in milliseconds; empty means retry immediately
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Create a policy that retries immediately
    pub fn new(max_attempts: usize) -> Self {
        RetryPolicy {
            max_attempts,
            backoff_ms: Vec::new(),
        }
    }

    /// Create a policy with exponential backoff: base, 2*base, 4*base, ...
    pub fn with_backoff(max_attempts: usize, base_ms: u64) -> Self {
        if base_ms == 0 {
            return Self::new(max_attempts);
        }
        let backoff_ms = (0..max_attempts.saturating_sub(1))
            .map(|i| base_ms.saturating_mul(2u64.saturating_pow(i as u32)))
            .collect();

        RetryPolicy {
            max_attempts,
            backoff_ms,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::with_backoff(config.max_attempts, config.retry_backoff_ms)
    }

    /// Check if another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: usize, error: &UploadError) -> bool {
        attempt < self.max_attempts && error.should_retry()
    }

    /// Get the wait before the retry that follows `attempt` (1-based)
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt.saturating_sub(1))
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// What a worker reports to the coordinator
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Completed(CompletedPart),
    Fatal(FatalReport),
}

/// A part exhausted its attempts and the session has been aborted
#[derive(Debug, Clone)]
pub struct FatalReport {
    pub upload_id: String,
    pub cause: UploadError,
    /// Set when the abort call itself failed
    pub abort_failure: Option<UploadError>,
}

impl FatalReport {
    pub fn into_error(self) -> UploadError {
        UploadError::Aborted {
            upload_id: self.upload_id,
            cause: Box::new(self.cause),
            abort_failure: self.abort_failure.map(Box::new),
        }
    }
}

/// Ensures a session is aborted at most once across workers and coordinator
#[derive(Debug, Clone, Default)]
pub struct AbortLatch {
    claimed: Arc<AtomicBool>,
}

impl AbortLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true for exactly one caller
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Abort a session, logging the outcome
///
/// Returns the abort failure, if any, so callers can keep it apart from the
/// error that caused the abort.
pub async fn abort_session<C: StorageClient>(
    client: &C,
    session: &UploadSession,
    metrics: &UploadMetrics,
) -> Option<UploadError> {
    info!("Aborting multipart upload {}", session.upload_id);
    match client.abort(session).await {
        Ok(()) => {
            info!("Abort succeeded for upload {}", session.upload_id);
            metrics.record_abort(true);
            None
        }
        Err(e) => {
            error!("Abort also failed for upload {}: {}", session.upload_id, e);
            metrics.record_abort(false);
            Some(e)
        }
    }
}

/// State shared by every worker of one upload
struct WorkerShared<C> {
    client: Arc<C>,
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
    abort_latch: AbortLatch,
    retry_policy: RetryPolicy,
    metrics: Arc<UploadMetrics>,
}

impl<C: StorageClient> WorkerShared<C> {
    /// Upload one part, retrying transient failures
    async fn upload_with_retry(
        &self,
        worker_id: usize,
        task: &UploadTask,
    ) -> Result<CompletedPart> {
        let part_index = task.part.index;
        let total_parts = task.session.total_parts;
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            debug!(
                "Worker {} uploading part {}/{} (attempt {})",
                worker_id, part_index, total_parts, attempt
            );
            self.metrics.record_part_attempt();

            let call = self
                .client
                .upload_part(&task.session, part_index, task.payload.clone());
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                result = call => result,
            };

            match result {
                Ok(etag) => {
                    info!("Worker {} finished part {}/{}", worker_id, part_index, total_parts);
                    self.metrics.record_part_completed(task.part.len());
                    return Ok(CompletedPart::new(part_index, etag));
                }
                Err(e) => {
                    if !self.retry_policy.should_retry(attempt, &e) {
                        self.metrics.record_part_failed();
                        return Err(UploadError::PartFailed {
                            part_index,
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let backoff = self.retry_policy.backoff_duration(attempt);
                    warn!(
                        "Worker {} retrying part {}/{} after attempt {} failed (waiting {:?}): {}",
                        worker_id, part_index, total_parts, attempt, backoff, e
                    );
                    self.metrics.record_part_retry();

                    if !backoff.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                            _ = sleep(backoff) => {}
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Cancel siblings, abort the session, and report the failure
    async fn fail(&self, worker_id: usize, session: &UploadSession, cause: UploadError) {
        if !self.abort_latch.claim() {
            debug!(
                "Worker {} dropping failure for already aborted upload {}: {}",
                worker_id, session.upload_id, cause
            );
            return;
        }

        error!("Worker {} giving up on upload {}: {}", worker_id, session.upload_id, cause);
        self.cancel.cancel();

        let abort_failure = abort_session(self.client.as_ref(), session, &self.metrics).await;
        let report = FatalReport {
            upload_id: session.upload_id.clone(),
            cause,
            abort_failure,
        };
        if self.events.send(WorkerEvent::Fatal(report)).await.is_err() {
            warn!("Coordinator stopped listening before fatal report for {}", session.upload_id);
        }
    }
}

async fn run_worker<C: StorageClient>(
    worker_id: usize,
    tasks: TaskReceiver,
    shared: Arc<WorkerShared<C>>,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                debug!("Worker {} stopping: upload cancelled", worker_id);
                return;
            }
            task = tasks.recv() => match task {
                Some(task) => task,
                None => {
                    debug!("Worker {} stopping: queue drained", worker_id);
                    return;
                }
            },
        };

        match shared.upload_with_retry(worker_id, &task).await {
            Ok(completed) => {
                if shared.events.send(WorkerEvent::Completed(completed)).await.is_err() {
                    return;
                }
            }
            Err(UploadError::Cancelled) => {
                debug!("Worker {} cancelled during part {}", worker_id, task.part.index);
                return;
            }
            Err(cause) => {
                shared.fail(worker_id, &task.session, cause).await;
                return;
            }
        }
    }
}

/// Fixed set of workers draining one upload's task queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers onto the current tokio runtime
    ///
    /// The pool owns `events`; once every worker has exited the receiving
    /// side observes the channel closing.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<C: StorageClient>(
        workers: usize,
        tasks: TaskReceiver,
        client: Arc<C>,
        events: mpsc::Sender<WorkerEvent>,
        cancel: CancellationToken,
        abort_latch: AbortLatch,
        retry_policy: RetryPolicy,
        metrics: Arc<UploadMetrics>,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            client,
            events,
            cancel,
            abort_latch,
            retry_policy,
            metrics,
        });

        let handles = (1..=workers)
            .map(|worker_id| {
                let tasks = tasks.clone();
                let shared = Arc::clone(&shared);
                tokio::spawn(run_worker(worker_id, tasks, shared))
            })
            .collect();

        WorkerPool { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Upload worker terminated abnormally: {}", e);
                first_error.get_or_insert(UploadError::InternalError(format!(
                    "worker join error: {}",
                    e
                )));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
