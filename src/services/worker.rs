//! The job processing loop.
//!
//! One or more worker processes poll the registry, claim the oldest PENDING
//! job, run the transform, and persist the outcome. Workers coordinate only
//! through the job store's atomic claim; there is no central scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

use crate::models::job::JobRecord;
use crate::services::job_store::{JobStore, JobStoreError};
use crate::services::storage::{StorageBackend, StorageError, OUTPUT_PREFIX};
use crate::services::transform::{Transform, TransformError};

/// Why a single job failed. Contained within that job's record; never
/// terminates the loop.
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("downloading input: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("scratch I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("transform task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct Worker {
    store: Arc<JobStore>,
    backend: Arc<StorageBackend>,
    transform: Arc<dyn Transform>,
    poll_interval: Duration,
    scratch_root: PathBuf,
    /// A terminal outcome whose registry write failed, held for retry on a
    /// later cycle so the job does not sit in PROCESSING forever.
    unfinished: Mutex<Option<JobRecord>>,
}

impl Worker {
    pub fn new(
        store: Arc<JobStore>,
        backend: Arc<StorageBackend>,
        transform: Arc<dyn Transform>,
        poll_interval: Duration,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            store,
            backend,
            transform,
            poll_interval,
            scratch_root,
            unfinished: Mutex::new(None),
        }
    }

    /// Poll until `shutdown` flips. Shutdown is only observed between cycles,
    /// never mid-claim or mid-upload.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "worker started");
        loop {
            if *shutdown.borrow() {
                tracing::info!("worker shutting down");
                return;
            }
            match self.run_once().await {
                Ok(true) => {
                    // Drained one job; immediately look for the next.
                }
                Ok(false) => {
                    tracing::trace!("no claimable jobs, sleeping");
                    self.idle(&mut shutdown).await;
                }
                Err(e) => {
                    // ClaimFailed and registry I/O errors leave every job
                    // unclaimed; back off and let a later cycle retry.
                    tracing::warn!(error = %e, "claim cycle failed, backing off");
                    self.idle(&mut shutdown).await;
                }
            }
        }
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = sleep(self.poll_interval) => {}
            changed = shutdown.changed() => {
                // A dropped sender must not turn the poll into a busy-wait.
                if changed.is_err() {
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Flush any deferred outcome, then claim and process at most one job.
    /// `Ok(false)` means nothing was claimable this cycle.
    pub async fn run_once(&self) -> Result<bool, JobStoreError> {
        self.flush_unfinished().await?;
        let Some(job) = self.store.claim_next_pending().await? else {
            return Ok(false);
        };
        self.process(job).await;
        Ok(true)
    }

    /// Retry the registry write for an outcome deferred by an earlier cycle.
    /// Transient failures re-defer and bubble up so the loop backs off;
    /// registry-level rejections will not heal and drop the outcome.
    async fn flush_unfinished(&self) -> Result<(), JobStoreError> {
        let Some(job) = self.unfinished.lock().await.take() else {
            return Ok(());
        };
        match self.store.update(&job).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, status = ?job.status, "deferred outcome persisted");
                Ok(())
            }
            Err(e) if outcome_retryable(&e) => {
                *self.unfinished.lock().await = Some(job);
                Err(e)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "dropping outcome the registry refuses");
                Ok(())
            }
        }
    }

    /// Run one claimed job to a terminal state. Per-job failures end up in
    /// the record, not in the return path.
    async fn process(&self, mut job: JobRecord) {
        let start = std::time::Instant::now();
        tracing::info!(job_id = %job.id, image_path = %job.image_path, "processing job");

        let outcome = self.execute(&job).await;
        let transition = match outcome {
            Ok(result_path) => {
                metrics::counter!("jobs_completed_total").increment(1);
                job.complete(result_path)
            }
            Err(e) => {
                metrics::counter!("jobs_failed_total").increment(1);
                tracing::warn!(job_id = %job.id, error = %e, "job processing failed");
                job.fail(e.to_string())
            }
        };
        if let Err(e) = transition {
            tracing::error!(job_id = %job.id, error = %e, "claimed job was not in PROCESSING");
            return;
        }

        match self.store.update(&job).await {
            Ok(()) => {
                metrics::histogram!("job_processing_seconds").record(start.elapsed().as_secs_f64());
                tracing::info!(job_id = %job.id, status = ?job.status, "job finished");
            }
            Err(e) if outcome_retryable(&e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to persist job outcome, deferring");
                *self.unfinished.lock().await = Some(job);
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to persist job outcome");
            }
        }
    }

    /// Download, transform, upload. The per-job scratch directory is dropped
    /// on every exit path, so no local files accumulate.
    async fn execute(&self, job: &JobRecord) -> Result<String, JobError> {
        let scratch = tempfile::Builder::new()
            .prefix("graymill-job-")
            .tempdir_in(&self.scratch_root)?;

        let input = scratch.path().join(format!("input.{}", extension_of(&job.image_path)));
        self.backend.fetch_to_path(&job.image_path, &input).await?;

        let extension = self.transform.output_extension();
        let output = scratch.path().join(format!("{}.{extension}", job.id));
        let transform = Arc::clone(&self.transform);
        {
            let (input, output) = (input.clone(), output.clone());
            tokio::task::spawn_blocking(move || transform.apply(&input, &output)).await??;
        }

        // One output object per job id: a retry of the same job overwrites
        // its own previous output instead of leaking a second object.
        let bytes = tokio::fs::read(&output).await?;
        let key = format!("{OUTPUT_PREFIX}/{}.{extension}", job.id);
        let uri = self.backend.put(&key, bytes.into()).await?;
        Ok(uri)
    }
}

/// Write races and backend hiccups are worth retrying; anything the registry
/// itself rejects (unknown id, illegal transition) stays rejected.
fn outcome_retryable(e: &JobStoreError) -> bool {
    matches!(
        e,
        JobStoreError::UpdateFailed { .. } | JobStoreError::Storage(_)
    )
}

fn extension_of(uri: &str) -> &str {
    std::path::Path::new(uri)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin")
}
