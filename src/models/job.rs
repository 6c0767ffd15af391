use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a processing job in the registry.
///
/// Transitions only move forward: PENDING -> PROCESSING -> DONE | FAILED.
/// Both terminal states are sticky; a job never re-enters PENDING.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether a full-record replace from `self` to `to` is legal. Staying on
    /// the same status is allowed so idempotent re-writes of a record pass.
    pub fn can_advance(self, to: JobStatus) -> bool {
        to == self
            || matches!(
                (self, to),
                (JobStatus::Pending, JobStatus::Processing)
                    | (JobStatus::Processing, JobStatus::Done)
                    | (JobStatus::Processing, JobStatus::Failed)
            )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("job {id}: illegal status transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0}: result_path must be set exactly when status is DONE")]
    ResultPathMismatch(Uuid),

    #[error("job {0}: error must be set exactly when status is FAILED")]
    ErrorMismatch(Uuid),
}

/// A single unit of work: where its input lives, where its output ended up,
/// and how far processing got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// URI of the uploaded input in the active backend. Immutable once created.
    pub image_path: String,
    /// URI of the transform output. Set exactly when the job is DONE.
    pub result_path: Option<String>,
    pub status: JobStatus,
    /// Diagnostic for the operator. Set exactly when the job is FAILED.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: Uuid, image_path: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            image_path,
            result_path: None,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobStateError> {
        if self.status == to || !self.status.can_advance(to) {
            return Err(JobStateError::IllegalTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// PENDING -> PROCESSING. The caller owns the job once this succeeds.
    pub fn start_processing(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Processing)
    }

    /// PROCESSING -> DONE, recording where the output was uploaded.
    pub fn complete(&mut self, result_path: String) -> Result<(), JobStateError> {
        self.transition(JobStatus::Done)?;
        self.result_path = Some(result_path);
        Ok(())
    }

    /// PROCESSING -> FAILED, recording a human-readable diagnostic.
    pub fn fail(&mut self, error: String) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Field-level invariants that must hold for any record accepted into the
    /// registry, regardless of how it was produced.
    pub fn validate(&self) -> Result<(), JobStateError> {
        if self.result_path.is_some() != (self.status == JobStatus::Done) {
            return Err(JobStateError::ResultPathMismatch(self.id));
        }
        if self.error.is_some() != (self.status == JobStatus::Failed) {
            return Err(JobStateError::ErrorMismatch(self.id));
        }
        Ok(())
    }
}
