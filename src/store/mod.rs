//! Job store contract.
//!
//! The store is the single source of truth and the sole synchronization
//! point between scheduler instances, workers, the watchdog and the
//! sweeper. All cross-process coordination happens through
//! [`JobStore::update_status_if_equals`]; in-process maps are bookkeeping
//! only.

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::models::{JobRecord, NewJobRecord};
use crate::jobs::types::JobStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    #[error("database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence backend for job rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly submitted job and return the stored row.
    async fn insert(&self, job: NewJobRecord) -> StoreResult<JobRecord>;

    /// Fetch a job by id.
    async fn get(&self, id: Uuid) -> StoreResult<Option<JobRecord>>;

    /// Atomic conditional status transition. Returns the number of rows
    /// changed: 1 when the row was in `from`, 0 otherwise. This is the claim
    /// primitive the at-most-once guarantee rests on; exactly one caller
    /// succeeds per row even under concurrent scheduler instances.
    ///
    /// A terminal `from` always returns 0: terminal rows are immutable
    /// except for retention deletion.
    async fn update_status_if_equals(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> StoreResult<u64>;

    /// Record the execution start time on a row the claim already moved to
    /// `Running`. Idempotent, and a no-op when the status has changed since
    /// the claim (e.g. a cancel landed first), so it never resurrects a row.
    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Persist worker progress (0-100) and the current step label.
    async fn update_progress(&self, id: Uuid, progress: i32, step: &str) -> StoreResult<()>;

    /// Terminal success: `Completed`, `progress = 100`, result payload,
    /// `completed_at = at`.
    async fn complete(&self, id: Uuid, result: Option<JsonValue>, at: DateTime<Utc>)
    -> StoreResult<()>;

    /// Terminal failure with captured error and truncated trace.
    ///
    /// Unconditional by design: the watchdog and a worker finishing at
    /// nearly the same instant race last-write-wins.
    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        trace: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Retry transition: `Retrying`, bumped `retry_count`, future
    /// `scheduled_at`, captured error kept on the row. Conditional on the
    /// row still being `Running` so a cancel that landed first is never
    /// resurrected into re-execution; returns rows changed.
    async fn reschedule(
        &self,
        id: Uuid,
        retry_count: i32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        trace: Option<&str>,
    ) -> StoreResult<u64>;

    /// Cancel a job that has not started running (`Pending` or `Retrying`).
    /// Conditional like a claim; returns rows changed.
    async fn cancel_if_claimable(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;

    /// Flip a running job to `Cancelled` immediately (best-effort
    /// cancellation; the worker may still be observing its token).
    /// Conditional on the row still being `Running` so a worker that just
    /// finished keeps its terminal state; returns rows changed.
    async fn cancel_if_running(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;

    /// Due `Pending`/`Retrying` jobs with `scheduled_at <= now`, oldest
    /// due-time first, capped at `limit`.
    async fn claimable(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<JobRecord>>;

    /// `Running` jobs whose `started_at` is before `cutoff` (presumed
    /// orphaned).
    async fn stuck(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<JobRecord>>;

    /// Delete terminal jobs completed before `cutoff`; returns the number
    /// deleted.
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Row counts per status.
    async fn status_counts(&self) -> StoreResult<HashMap<JobStatus, u64>>;
}
