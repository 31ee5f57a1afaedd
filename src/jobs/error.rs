use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    /// Submission named a job type with no registered executor.
    #[error("No executor registered for job type: {job_type}")]
    UnknownJobType { job_type: String },

    /// The executor's parameter validator rejected the submission.
    #[error("Invalid parameters for job type {job_type}: {reason}")]
    InvalidParameters { job_type: String, reason: String },

    /// An executor is already registered under this job type.
    #[error("Executor already registered for job type: {job_type}")]
    DuplicateExecutor { job_type: String },

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job store error")]
    Store(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;
