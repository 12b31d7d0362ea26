//! Upload coordinator
//!
//! Owns the lifecycle of one multipart session:
//!
//! ```text
//! Idle -> Initiating -> Dispatching -> AwaitingCompletion -> Finalizing -> Completed
//!              |                              |                  |
//!              +--> Failed                    +--> Aborted       +--> Failed
//! ```
//!
//! `Failed` covers the outcomes where no abort is issued: the session never
//! opened, or finalize was rejected and the session is left for the caller.

use crate::aggregator::{AggregationProgress, PartAggregator};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::metrics::UploadMetrics;
use crate::models::{
    CompletedPart, InitiateRequest, ObjectDescriptor, Part, UploadSession, UploadTask,
};
use crate::part_calculator::PartCalculator;
use crate::storage_client::StorageClient;
use crate::task_queue::TaskQueue;
use crate::worker_pool::{
    abort_session, AbortLatch, FatalReport, RetryPolicy, WorkerEvent, WorkerPool,
};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the coordinator's current upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    Idle,
    Initiating,
    Dispatching,
    AwaitingCompletion,
    Finalizing,
    Completed,
    Aborted,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Aborted | UploadState::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            // Every run starts from Idle, including re-runs after a terminal state
            (_, Idle) => true,
            (Idle, Initiating) | (Idle, Failed) => true,
            (Initiating, Dispatching) | (Initiating, Failed) => true,
            (Dispatching, AwaitingCompletion) | (Dispatching, Aborted) => true,
            (AwaitingCompletion, Finalizing) | (AwaitingCompletion, Aborted) => true,
            (Finalizing, Completed) | (Finalizing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why the await phase ended without full coverage
enum Interruption {
    /// A worker exhausted a part and already aborted the session
    Fatal(FatalReport),
    /// Workers stopped for another reason; the session is still open
    Stopped(UploadError),
}

/// Drives a multipart upload from initiation to finalize or abort
pub struct UploadCoordinator<C: StorageClient> {
    client: Arc<C>,
    config: UploadConfig,
    metrics: Arc<UploadMetrics>,
    cancel: CancellationToken,
    state: watch::Sender<UploadState>,
}

impl<C: StorageClient> UploadCoordinator<C> {
    /// Create a coordinator
    ///
    /// # Returns
    /// * `Err(UploadError::ConfigError)` if `config` fails validation
    pub fn new(client: Arc<C>, config: UploadConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(UploadState::Idle);
        Ok(UploadCoordinator {
            client,
            config,
            metrics: Arc::new(UploadMetrics::new()),
            cancel: CancellationToken::new(),
            state,
        })
    }

    /// Use an external token; cancelling it aborts the upload in flight
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<UploadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<UploadMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> UploadState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    fn transition(&self, next: UploadState) {
        let previous = self.state.send_replace(next);
        if !previous.can_transition_to(next) {
            warn!("Unexpected upload state transition {} -> {}", previous, next);
        }
        debug!("Upload state {} -> {}", previous, next);
    }

    /// Upload `payload` as a single object
    ///
    /// # Returns
    /// * `Ok(ObjectDescriptor)` once finalize succeeded
    /// * `Err(UploadError::ConfigError)` for an empty payload or a plan that
    ///   needs more than `max_parts` parts; nothing is sent to the service
    /// * `Err(UploadError::InitiateError)` if the session could not be opened
    /// * `Err(UploadError::Aborted)` if a part exhausted its attempts, the
    ///   upload was cancelled, or workers stopped early; the session has
    ///   been aborted
    /// * `Err(UploadError::FinalizeError)` if finalize was rejected; the
    ///   session is left open
    pub async fn upload(
        &self,
        payload: Bytes,
        request: InitiateRequest,
    ) -> Result<ObjectDescriptor> {
        let started = Instant::now();
        self.transition(UploadState::Idle);

        let parts = match self.plan(payload.len() as u64) {
            Ok(parts) => parts,
            Err(e) => {
                self.transition(UploadState::Failed);
                return Err(e);
            }
        };

        self.metrics.record_upload_started();
        self.transition(UploadState::Initiating);
        info!(
            "Initiating multipart upload of {} bytes to {}/{} ({} parts, storage class {})",
            payload.len(),
            request.bucket,
            request.key,
            parts.len(),
            request.storage_class
        );

        let upload_id = match self.client.initiate(&request).await {
            Ok(upload_id) => upload_id,
            Err(e) => {
                error!("Failed to initiate multipart upload for {}: {}", request.key, e);
                self.metrics.record_upload_failed();
                self.transition(UploadState::Failed);
                return Err(UploadError::InitiateError(e.to_string()));
            }
        };
        info!("Created multipart upload, upload id = {}", upload_id);

        let session = Arc::new(UploadSession {
            upload_id,
            bucket: request.bucket,
            key: request.key,
            total_parts: parts.len(),
        });

        let ordered = match self.run_session(&session, &parts, &payload).await {
            Ok(ordered) => ordered,
            Err(e) => {
                self.metrics.record_upload_aborted();
                self.transition(UploadState::Aborted);
                return Err(e);
            }
        };

        self.transition(UploadState::Finalizing);
        info!("Completing upload {} with {} parts", session.upload_id, ordered.len());
        match self.client.finalize(&session, &ordered).await {
            Ok(descriptor) => {
                self.metrics.record_upload_completed(started.elapsed());
                self.transition(UploadState::Completed);
                info!(
                    "Successfully uploaded {}/{} in {:?}",
                    descriptor.bucket,
                    descriptor.key,
                    started.elapsed()
                );
                Ok(descriptor)
            }
            Err(e) => {
                error!(
                    "Finalize failed for upload {}; session left open: {}",
                    session.upload_id, e
                );
                self.metrics.record_finalize_failure();
                self.metrics.record_upload_failed();
                self.transition(UploadState::Failed);
                Err(UploadError::FinalizeError(format!(
                    "{} (upload id {})",
                    e, session.upload_id
                )))
            }
        }
    }

    /// Compute the part list, rejecting inputs no session should be opened for
    fn plan(&self, size: u64) -> Result<Vec<Part>> {
        if size == 0 {
            return Err(UploadError::ConfigError(
                "cannot upload an empty file".to_string(),
            ));
        }

        let calculator = PartCalculator::new(self.config.part_size)?;
        let total_parts = calculator.calculate_total_parts(size);
        if total_parts > self.config.max_parts {
            return Err(UploadError::ConfigError(format!(
                "{} bytes in {} byte parts needs {} parts, more than the limit of {}",
                size, self.config.part_size, total_parts, self.config.max_parts
            )));
        }

        calculator.calculate_parts(size)
    }

    /// Dispatch every part and wait for full coverage or a fatal failure
    ///
    /// Returns the acknowledgments ordered by part index. Any error returned
    /// is `UploadError::Aborted` and the session is no longer open.
    async fn run_session(
        &self,
        session: &Arc<UploadSession>,
        parts: &[Part],
        payload: &Bytes,
    ) -> Result<Vec<CompletedPart>> {
        self.transition(UploadState::Dispatching);
        let cancel = self.cancel.child_token();
        let abort_latch = AbortLatch::new();

        let mut queue = TaskQueue::with_capacity(parts.len());
        for part in parts {
            let task = UploadTask {
                session: Arc::clone(session),
                part: *part,
                payload: payload.slice(part.range.as_offsets()),
            };
            if let Err(e) = queue.push(task) {
                return Err(self.abort_open_session(session, &abort_latch, e).await);
            }
        }
        queue.close();
        debug!("Enqueued {} tasks for upload {}", parts.len(), session.upload_id);

        let (events_tx, mut events_rx) = mpsc::channel(parts.len());
        let pool = WorkerPool::spawn(
            self.config.workers,
            queue.receiver(),
            Arc::clone(&self.client),
            events_tx,
            cancel.clone(),
            abort_latch.clone(),
            RetryPolicy::from_config(&self.config),
            Arc::clone(&self.metrics),
        );

        self.transition(UploadState::AwaitingCompletion);
        let mut aggregator = PartAggregator::new(parts.len());
        let interruption = loop {
            match events_rx.recv().await {
                Some(WorkerEvent::Completed(part)) => match aggregator.record(part) {
                    Ok(AggregationProgress::Complete) => break None,
                    Ok(AggregationProgress::Pending { received, total }) => {
                        debug!("Upload {}: {}/{} parts done", session.upload_id, received, total);
                    }
                    Err(e) => break Some(Interruption::Stopped(e)),
                },
                Some(WorkerEvent::Fatal(report)) => break Some(Interruption::Fatal(report)),
                None => {
                    let cause = if cancel.is_cancelled() {
                        UploadError::Cancelled
                    } else {
                        UploadError::IncompleteUpload(format!(
                            "workers exited after {} of {} parts",
                            aggregator.len(),
                            aggregator.total_parts()
                        ))
                    };
                    break Some(Interruption::Stopped(cause));
                }
            }
        };

        if interruption.is_some() {
            cancel.cancel();
        }
        if let Err(e) = pool.join().await {
            warn!("Upload {}: {}", session.upload_id, e);
        }

        match interruption {
            None => aggregator.into_ordered_parts(),
            Some(Interruption::Fatal(report)) => {
                error!("Upload {} aborted: {}", session.upload_id, report.cause);
                Err(report.into_error())
            }
            Some(Interruption::Stopped(cause)) => {
                Err(self.abort_open_session(session, &abort_latch, cause).await)
            }
        }
    }

    /// Abort a session the workers did not abort themselves
    async fn abort_open_session(
        &self,
        session: &UploadSession,
        abort_latch: &AbortLatch,
        cause: UploadError,
    ) -> UploadError {
        warn!("Stopping upload {}: {}", session.upload_id, cause);
        let abort_failure = if abort_latch.claim() {
            abort_session(self.client.as_ref(), session, &self.metrics).await
        } else {
            None
        };

        UploadError::Aborted {
            upload_id: session.upload_id.clone(),
            cause: Box::new(cause),
            abort_failure: abort_failure.map(Box::new),
        }
    }
}

/// Upload `payload` and block until the object is finalized or the upload fails
///
/// Builds its own tokio runtime, so it must not be called from within one.
pub fn upload_blocking<C: StorageClient>(
    client: Arc<C>,
    payload: Bytes,
    request: InitiateRequest,
    config: UploadConfig,
) -> Result<ObjectDescriptor> {
    let coordinator = UploadCoordinator::new(client, config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| UploadError::InternalError(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(coordinator.upload(payload, request))
}
