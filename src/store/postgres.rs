//! PostgreSQL job store backed by diesel-async.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::jobs::models::{JobRecord, NewJobRecord};
use crate::jobs::types::JobStatus;
use crate::schema::background_jobs;

use super::{JobStore, StoreError, StoreResult};

diesel::define_sql_function! {
    fn coalesce(a: diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>, b: diesel::sql_types::Timestamptz) -> diesel::sql_types::Nullable<diesel::sql_types::Timestamptz>;
}

const CLAIMABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Retrying];
const TERMINAL: [JobStatus; 3] = [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

/// Job store over the shared PostgreSQL pool.
///
/// Every conditional transition is a single `UPDATE ... WHERE id = ? AND
/// status = ?`; the row count tells the caller whether it won the race.
#[derive(Clone)]
pub struct PgJobStore {
    pool: AsyncDbPool,
}

impl PgJobStore {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionPool {
                source: anyhow::Error::from(e),
            })
    }
}

fn db_err(operation: &str) -> impl FnOnce(diesel::result::Error) -> StoreError + '_ {
    move |e| StoreError::Database {
        operation: operation.to_string(),
        source: anyhow::Error::from(e),
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: NewJobRecord) -> StoreResult<JobRecord> {
        let mut conn = self.conn().await?;

        diesel::insert_into(background_jobs::table)
            .values(&job)
            .get_result(&mut conn)
            .await
            .map_err(db_err("insert job"))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;

        background_jobs::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err("get job"))
    }

    async fn update_status_if_equals(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> StoreResult<u64> {
        if from.is_terminal() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;

        let rows = diesel::update(
            background_jobs::table
                .find(id)
                .filter(background_jobs::status.eq(from)),
        )
        .set(background_jobs::status.eq(to))
        .execute(&mut conn)
        .await
        .map_err(db_err("conditional status update"))?;

        Ok(rows as u64)
    }

    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(
            background_jobs::table
                .find(id)
                .filter(background_jobs::status.eq(JobStatus::Running)),
        )
        .set(background_jobs::started_at.eq(coalesce(background_jobs::started_at, at)))
        .execute(&mut conn)
        .await
        .map_err(db_err("mark started"))?;

        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: i32, step: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(background_jobs::table.find(id))
            .set((
                background_jobs::progress.eq(progress.clamp(0, 100)),
                background_jobs::current_step.eq(step),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err("update progress"))?;

        Ok(())
    }

    async fn complete(
        &self,
        id: Uuid,
        result: Option<JsonValue>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(background_jobs::table.find(id))
            .set((
                background_jobs::status.eq(JobStatus::Completed),
                background_jobs::progress.eq(100),
                background_jobs::result.eq(result),
                background_jobs::completed_at.eq(at),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err("complete job"))?;

        Ok(())
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        trace: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(background_jobs::table.find(id))
            .set((
                background_jobs::status.eq(JobStatus::Failed),
                background_jobs::error_message.eq(error),
                background_jobs::stack_trace.eq(trace),
                background_jobs::completed_at.eq(at),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err("fail job"))?;

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
        let mut conn = self.conn().await?;

        let rows = diesel::update(
            background_jobs::table
                .find(id)
                .filter(background_jobs::status.eq(JobStatus::Running)),
        )
        .set((
            background_jobs::status.eq(JobStatus::Retrying),
            background_jobs::retry_count.eq(retry_count),
            background_jobs::scheduled_at.eq(scheduled_at),
            background_jobs::error_message.eq(error),
            background_jobs::stack_trace.eq(trace),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err("reschedule job"))?;

        Ok(rows as u64)
    }

    async fn cancel_if_claimable(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.conn().await?;

        let rows = diesel::update(
            background_jobs::table
                .find(id)
                .filter(background_jobs::status.eq_any(CLAIMABLE)),
        )
        .set((
            background_jobs::status.eq(JobStatus::Cancelled),
            background_jobs::completed_at.eq(at),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err("cancel claimable job"))?;

        Ok(rows as u64)
    }

    async fn cancel_if_running(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.conn().await?;

        let rows = diesel::update(
            background_jobs::table
                .find(id)
                .filter(background_jobs::status.eq(JobStatus::Running)),
        )
        .set((
            background_jobs::status.eq(JobStatus::Cancelled),
            background_jobs::completed_at.eq(at),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err("cancel running job"))?;

        Ok(rows as u64)
    }

    async fn claimable(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;

        background_jobs::table
            .filter(background_jobs::status.eq_any(CLAIMABLE))
            .filter(background_jobs::scheduled_at.le(now))
            .order(background_jobs::scheduled_at.asc())
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(db_err("query claimable jobs"))
    }

    async fn stuck(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;

        background_jobs::table
            .filter(background_jobs::status.eq(JobStatus::Running))
            .filter(background_jobs::started_at.lt(cutoff))
            .load(&mut conn)
            .await
            .map_err(db_err("query stuck jobs"))
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.conn().await?;

        let rows = diesel::delete(
            background_jobs::table
                .filter(background_jobs::status.eq_any(TERMINAL))
                .filter(background_jobs::completed_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(db_err("purge terminal jobs"))?;

        Ok(rows as u64)
    }

    async fn status_counts(&self) -> StoreResult<HashMap<JobStatus, u64>> {
        let mut conn = self.conn().await?;

        let rows: Vec<(JobStatus, i64)> = background_jobs::table
            .group_by(background_jobs::status)
            .select((background_jobs::status, count_star()))
            .load(&mut conn)
            .await
            .map_err(db_err("count jobs by status"))?;

        Ok(rows
            .into_iter()
            .map(|(status, n)| (status, n.max(0) as u64))
            .collect())
    }
}
