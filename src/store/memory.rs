//! In-memory job store for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::models::{JobRecord, NewJobRecord};
use crate::jobs::types::JobStatus;

use super::{JobStore, StoreError, StoreResult};

/// Mutex-guarded map of job rows.
///
/// Mirrors the transition semantics of [`super::PgJobStore`] closely enough
/// for the engine's tests; it is not meant for multi-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        self.jobs.lock().expect("job store mutex poisoned")
    }
}

#[cfg(test)]
impl InMemoryJobStore {
    /// Rewind a running job's start time, e.g. to trip the watchdog.
    pub(crate) fn backdate_started_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(&id) {
            job.started_at = Some(at);
        }
    }

    /// Rewind a terminal job's completion time, e.g. to trip the sweeper.
    pub(crate) fn backdate_completed_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(&id) {
            job.completed_at = Some(at);
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: NewJobRecord) -> StoreResult<JobRecord> {
        let record = JobRecord {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            parameters: job.parameters,
            progress: job.progress,
            current_step: None,
            result: None,
            error_message: None,
            stack_trace: None,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            scheduled_at: job.scheduled_at,
            started_at: None,
            completed_at: None,
            created_at: job.created_at,
            tenant_id: job.tenant_id,
            created_by: job.created_by,
        };

        self.lock().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<JobRecord>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn update_status_if_equals(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> StoreResult<u64> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if !from.is_terminal() && job.status == from => {
                job.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(at);
        }
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: i32, step: &str) -> StoreResult<()> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.progress = progress.clamp(0, 100);
        job.current_step = Some(step.to_string());
        Ok(())
    }

    async fn complete(
        &self,
        id: Uuid,
        result: Option<JsonValue>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result = result;
        job.completed_at = Some(at);
        Ok(())
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        trace: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        job.stack_trace = trace.map(str::to_string);
        job.completed_at = Some(at);
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        retry_count: i32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        trace: Option<&str>,
    ) -> StoreResult<u64> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Retrying;
                job.retry_count = retry_count;
                job.scheduled_at = scheduled_at;
                job.error_message = Some(error.to_string());
                job.stack_trace = trace.map(str::to_string);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn cancel_if_claimable(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status.is_claimable() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn cancel_if_running(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn claimable(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<JobRecord>> {
        let jobs = self.lock();
        let mut due: Vec<_> = jobs
            .values()
            .filter(|j| j.status.is_claimable() && j.scheduled_at <= now)
            .cloned()
            .collect();

        due.sort_by_key(|j| j.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn stuck(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<JobRecord>> {
        let jobs = self.lock();
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Running
                    && j.started_at.is_some_and(|started| started < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.status.is_terminal() && j.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn status_counts(&self) -> StoreResult<HashMap<JobStatus, u64>> {
        let jobs = self.lock();
        let mut counts = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
