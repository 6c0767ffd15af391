//! The durable, backend-agnostic job registry.
//!
//! All records are persisted as one JSON aggregate (`jobs/jobs.json`) in the
//! active storage backend, insertion order preserved for FIFO claiming. The
//! aggregate is the only shared mutable state in the system, so every
//! mutation goes through the same discipline: an in-process single-writer
//! lock around the read-modify-write, plus an entity-tag conditional write
//! against the backend so concurrent worker processes cannot lose updates.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{JobRecord, JobStateError, JobStatus};
use crate::services::storage::{StorageBackend, StorageError, INPUT_PREFIX};

/// Key of the serialized registry aggregate within the backend namespace.
pub const REGISTRY_KEY: &str = "jobs/jobs.json";

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job registry is corrupt: {0}")]
    RegistryCorrupt(String),

    #[error("failed to encode job registry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("job registry is full ({0} jobs); raise MAX_JOBS or archive")]
    RegistryFull(usize),

    #[error("claim lost the registry write race {0} times, giving up this cycle")]
    ClaimFailed(u32),

    #[error("update of job {id} lost the registry write race {attempts} times")]
    UpdateFailed { id: Uuid, attempts: u32 },

    #[error("job {0}: image_path is immutable")]
    ImagePathImmutable(Uuid),

    #[error(transparent)]
    State(#[from] JobStateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Registry of [`JobRecord`]s on top of one [`StorageBackend`].
pub struct JobStore {
    backend: Arc<StorageBackend>,
    /// Serializes read-modify-write cycles within this process. Cross-process
    /// safety comes from the conditional write in [`StorageBackend`].
    writer: Mutex<()>,
    max_attempts: u32,
    max_jobs: usize,
}

impl JobStore {
    pub fn new(backend: Arc<StorageBackend>, max_attempts: u32, max_jobs: usize) -> Self {
        Self {
            backend,
            writer: Mutex::new(()),
            max_attempts: max_attempts.max(1),
            max_jobs,
        }
    }

    /// Load the registry with its current version token. A missing aggregate
    /// is an empty registry; an unparsable one is fatal and is never reset.
    async fn load(
        &self,
    ) -> Result<(Vec<JobRecord>, Option<object_store::UpdateVersion>), JobStoreError> {
        match self.backend.load_versioned(REGISTRY_KEY).await? {
            None => Ok((Vec::new(), None)),
            Some((bytes, version)) => {
                let jobs: Vec<JobRecord> = serde_json::from_slice(&bytes)
                    .map_err(|e| JobStoreError::RegistryCorrupt(e.to_string()))?;
                Ok((jobs, Some(version)))
            }
        }
    }

    async fn persist(
        &self,
        jobs: &[JobRecord],
        version: Option<object_store::UpdateVersion>,
    ) -> Result<(), JobStoreError> {
        let payload = serde_json::to_vec_pretty(jobs)?;
        self.backend
            .put_versioned(REGISTRY_KEY, Bytes::from(payload), version)
            .await?;
        Ok(())
    }

    /// Upload the input bytes and append a PENDING record for them.
    ///
    /// The object key embeds the fresh job id, so distinct submissions with
    /// the same filename never collide in the input namespace.
    pub async fn create(&self, filename: &str, bytes: Bytes) -> Result<JobRecord, JobStoreError> {
        let id = Uuid::new_v4();
        let key = format!("{INPUT_PREFIX}/{id}-{}", sanitize_filename(filename));
        let image_path = self.backend.put(&key, bytes).await?;
        let record = JobRecord::new(id, image_path);

        let _guard = self.writer.lock().await;
        for attempt in 1..=self.max_attempts {
            let (mut jobs, version) = self.load().await?;
            if jobs.len() >= self.max_jobs {
                return Err(JobStoreError::RegistryFull(self.max_jobs));
            }
            jobs.push(record.clone());
            match self.persist(&jobs, version).await {
                Ok(()) => {
                    tracing::info!(job_id = %record.id, image_path = %record.image_path, "job created");
                    return Ok(record);
                }
                Err(JobStoreError::Storage(StorageError::VersionConflict(_))) => {
                    tracing::debug!(job_id = %record.id, attempt, "registry write conflict on create, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobStoreError::UpdateFailed {
            id,
            attempts: self.max_attempts,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, JobStoreError> {
        let (jobs, _) = self.load().await?;
        Ok(jobs.into_iter().find(|job| job.id == id))
    }

    /// All records in insertion order. Used by tests and the health surface.
    pub async fn list(&self) -> Result<Vec<JobRecord>, JobStoreError> {
        let (jobs, _) = self.load().await?;
        Ok(jobs)
    }

    /// Full replace of the record matching `record.id`.
    ///
    /// The replacement must satisfy the record invariants, keep `image_path`
    /// unchanged, and be reachable from the stored status (terminal states
    /// are sticky). Lost conditional writes are retried up to the bound.
    pub async fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        record.validate()?;

        let _guard = self.writer.lock().await;
        for attempt in 1..=self.max_attempts {
            let (mut jobs, version) = self.load().await?;
            let slot = jobs
                .iter_mut()
                .find(|job| job.id == record.id)
                .ok_or(JobStoreError::NotFound(record.id))?;
            if slot.image_path != record.image_path {
                return Err(JobStoreError::ImagePathImmutable(record.id));
            }
            if !slot.status.can_advance(record.status) {
                return Err(JobStateError::IllegalTransition {
                    id: record.id,
                    from: slot.status,
                    to: record.status,
                }
                .into());
            }
            *slot = record.clone();
            match self.persist(&jobs, version).await {
                Ok(()) => return Ok(()),
                Err(JobStoreError::Storage(StorageError::VersionConflict(_))) => {
                    tracing::debug!(job_id = %record.id, attempt, "registry write conflict on update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobStoreError::UpdateFailed {
            id: record.id,
            attempts: self.max_attempts,
        })
    }

    /// Atomically claim the earliest-inserted PENDING job.
    ///
    /// The PENDING -> PROCESSING transition and its persistence happen as one
    /// conditional write: two concurrent callers can both observe the same
    /// record, but only the first write wins and the loser retries against
    /// the fresh registry. Exhausting the retry bound surfaces
    /// [`JobStoreError::ClaimFailed`] and leaves every job unclaimed.
    pub async fn claim_next_pending(&self) -> Result<Option<JobRecord>, JobStoreError> {
        let _guard = self.writer.lock().await;
        for attempt in 1..=self.max_attempts {
            let (mut jobs, version) = self.load().await?;
            let Some(job) = jobs
                .iter_mut()
                .find(|job| job.status == JobStatus::Pending)
            else {
                return Ok(None);
            };
            job.start_processing()?;
            let claimed = job.clone();
            match self.persist(&jobs, version).await {
                Ok(()) => {
                    tracing::debug!(job_id = %claimed.id, "job claimed");
                    return Ok(Some(claimed));
                }
                Err(JobStoreError::Storage(StorageError::VersionConflict(_))) => {
                    tracing::debug!(job_id = %claimed.id, attempt, "lost claim race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(JobStoreError::ClaimFailed(self.max_attempts))
    }

    /// Registry readable? Used by the health endpoint.
    pub async fn health_check(&self) -> Result<(), JobStoreError> {
        self.load().await.map(|_| ())
    }
}

/// Reduce a client-supplied filename to a safe basename for the object key.
fn sanitize_filename(filename: &str) -> String {
    std::path::Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload.bin")
        .to_string()
}
