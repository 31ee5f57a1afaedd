//! Executor-facing job types and contracts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::error::JobError;
use crate::jobs::models::JobRecord;
use crate::jobs::retry::default_backoff;
use crate::notify::{self, JobUpdate, StatusSink};
use crate::store::JobStore;

/// Opaque string parameters passed to an executor at submission time.
pub type JobParameters = HashMap<String, String>;

/// Job lifecycle status.
///
/// `Retrying` is claimable exactly like `Pending` once its `scheduled_at`
/// is due. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobStatus")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses the scheduler may claim when due.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Retrying => write!(f, "retrying"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Persists progress updates and pushes them to the status sink.
///
/// Handed to the executor through [`JobContext`]. Sink pushes are
/// fire-and-forget; a failing sink never affects the job outcome.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn StatusSink>,
    job_id: Uuid,
    job_type: String,
}

impl ProgressReporter {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn StatusSink>,
        job_id: Uuid,
        job_type: String,
    ) -> Self {
        Self {
            store,
            sink,
            job_id,
            job_type,
        }
    }

    /// Record progress (clamped to 0-100) and the current step label.
    pub async fn report(&self, progress: u8, step: &str) {
        let pct = i32::from(progress.min(100));
        if let Err(e) = self.store.update_progress(self.job_id, pct, step).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "failed to persist job progress");
        }

        notify::publish_best_effort(
            Arc::clone(&self.sink),
            JobUpdate {
                job_id: self.job_id,
                job_type: self.job_type.clone(),
                status: JobStatus::Running,
                progress: pct,
                current_step: Some(step.to_string()),
                error_message: None,
            },
        );
    }
}

/// Execution context passed to a running executor.
#[derive(Clone)]
pub struct JobContext {
    /// Snapshot of the claimed job row.
    pub job: JobRecord,
    /// Progress reporting handle.
    pub progress: ProgressReporter,
    /// Advisory cancellation signal; executors should poll it and stop
    /// promptly when it fires.
    pub cancellation: CancellationToken,
}

impl JobContext {
    /// Convenience accessor for a single string parameter.
    pub fn param(&self, key: &str) -> Option<String> {
        self.job
            .parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Pluggable implementation that performs the actual work for one job type.
///
/// Expected failures are returned as `Err` values; the supervisor captures
/// them and routes them through the retry policy. Panics are reserved for
/// host bugs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Unique job-type key this executor handles.
    fn job_type(&self) -> &str;

    /// Synchronous parameter validation run at submission time. Rejection
    /// means nothing is persisted.
    fn validate_parameters(&self, _params: &JobParameters) -> Result<(), JobError> {
        Ok(())
    }

    /// Perform the work. The returned value is stored as the job result.
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<Option<JsonValue>>;

    /// Whether a failure of this executor should be retried at all.
    fn is_retryable(&self) -> bool {
        true
    }

    /// Delay before retry `attempt` (1-indexed). Defaults to capped
    /// exponential backoff.
    fn retry_delay(&self, attempt: u32) -> Duration {
        default_backoff(attempt)
    }
}
