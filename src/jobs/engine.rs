//! Engine handle and producer-facing API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::{JobRecord, NewJobRecord};
use crate::jobs::registry::ExecutorRegistry;
use crate::jobs::types::{JobParameters, JobStatus};
use crate::jobs::{scheduler, sweeper, watchdog};
use crate::notify::{self, JobUpdate, StatusSink};
use crate::store::JobStore;

/// Engine-wide counters returned by [`JobEngine::statistics`].
#[derive(Debug, Clone, Serialize)]
pub struct JobStatistics {
    /// Row counts per status, from the store.
    pub count_by_status: HashMap<JobStatus, u64>,
    /// Total persisted jobs.
    pub total: u64,
    /// Jobs currently executing in this process.
    pub running_local: usize,
    /// Configured worker slot count.
    pub pool_size: usize,
}

/// State shared between the engine handle and its background loops.
pub(crate) struct EngineShared {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: ExecutorRegistry,
    pub(crate) sink: Arc<dyn StatusSink>,
    pub(crate) config: EngineConfig,
    /// Bounded worker slots.
    pub(crate) slots: Arc<Semaphore>,
    /// Cancellation tokens for jobs executing in this process. Local
    /// bookkeeping for cancellation and statistics only; correctness rests
    /// on the store's conditional update, never on this map.
    pub(crate) running: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Out-of-band scheduler wakeup, poked on submission.
    pub(crate) wakeup: Notify,
    pub(crate) shutdown: CancellationToken,
    /// In-flight supervisor tasks, drained on shutdown.
    pub(crate) workers: TaskTracker,
}

impl EngineShared {
    pub(crate) fn remove_running(&self, id: Uuid) -> Option<CancellationToken> {
        self.running
            .lock()
            .expect("running map mutex poisoned")
            .remove(&id)
    }

    pub(crate) fn insert_running(&self, id: Uuid, token: CancellationToken) {
        self.running
            .lock()
            .expect("running map mutex poisoned")
            .insert(id, token);
    }

    pub(crate) fn running_count(&self) -> usize {
        self.running.lock().expect("running map mutex poisoned").len()
    }
}

/// Handle to the background job execution engine.
///
/// Clonable; producers submit, cancel and inspect jobs through it. The
/// engine owns a scheduler loop, a watchdog loop and a retention sweeper,
/// all coordinating with other instances solely through the job store.
#[derive(Clone)]
pub struct JobEngine {
    shared: Arc<EngineShared>,
    loops: TaskTracker,
    started: Arc<AtomicBool>,
}

impl JobEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: ExecutorRegistry,
        sink: Arc<dyn StatusSink>,
        config: EngineConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_count));

        Self {
            shared: Arc::new(EngineShared {
                store,
                registry,
                sink,
                config,
                slots,
                running: Mutex::new(HashMap::new()),
                wakeup: Notify::new(),
                shutdown: CancellationToken::new(),
                workers: TaskTracker::new(),
            }),
            loops: TaskTracker::new(),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the scheduler, watchdog and sweeper loops. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(
            workers = self.shared.config.worker_count,
            tick_secs = self.shared.config.scheduler_tick_secs,
            "job engine starting"
        );

        self.loops.spawn(scheduler::run(Arc::clone(&self.shared)));
        self.loops.spawn(watchdog::run(Arc::clone(&self.shared)));
        self.loops.spawn(sweeper::run(Arc::clone(&self.shared)));
        self.loops.close();
    }

    /// Stop the loops and drain in-flight jobs.
    ///
    /// Waits up to the configured grace period for running jobs to finish,
    /// then cancels their tokens. Jobs that never observe cancellation are
    /// left `Running` in the store for the next watchdog pass to reconcile.
    pub async fn shutdown(&self) {
        tracing::info!("job engine shutting down");
        self.shared.shutdown.cancel();
        self.loops.wait().await;

        self.shared.workers.close();
        let drained = tokio::select! {
            _ = self.shared.workers.wait() => true,
            _ = tokio::time::sleep(self.shared.config.shutdown_grace()) => false,
        };

        if !drained {
            let tokens: Vec<CancellationToken> = {
                let running = self
                    .shared
                    .running
                    .lock()
                    .expect("running map mutex poisoned");
                running.values().cloned().collect()
            };

            tracing::warn!(
                remaining = tokens.len(),
                "grace period elapsed, cancelling remaining jobs"
            );
            for token in tokens {
                token.cancel();
            }
            self.shared.workers.wait().await;
        }

        tracing::info!("job engine stopped");
    }

    /// Submit a job for execution as soon as a worker is free.
    pub async fn submit(
        &self,
        job_type: &str,
        parameters: JobParameters,
        created_by: Option<String>,
        tenant_id: Option<String>,
    ) -> JobResult<JobRecord> {
        self.submit_at(job_type, parameters, Utc::now(), created_by, tenant_id)
            .await
    }

    /// Submit a job to run no earlier than `at`.
    pub async fn submit_scheduled(
        &self,
        job_type: &str,
        parameters: JobParameters,
        at: DateTime<Utc>,
        created_by: Option<String>,
        tenant_id: Option<String>,
    ) -> JobResult<JobRecord> {
        self.submit_at(job_type, parameters, at, created_by, tenant_id)
            .await
    }

    async fn submit_at(
        &self,
        job_type: &str,
        parameters: JobParameters,
        at: DateTime<Utc>,
        created_by: Option<String>,
        tenant_id: Option<String>,
    ) -> JobResult<JobRecord> {
        let executor =
            self.shared
                .registry
                .get(job_type)
                .ok_or_else(|| JobError::UnknownJobType {
                    job_type: job_type.to_string(),
                })?;

        // Validation runs before anything is persisted; a rejected
        // submission leaves no record behind.
        executor.validate_parameters(&parameters)?;

        let record = NewJobRecord::pending(
            job_type,
            &parameters,
            at,
            self.shared.config.default_max_retries,
            created_by,
            tenant_id,
        );

        let stored = self.shared.store.insert(record).await?;
        tracing::info!(
            job_id = %stored.id,
            job_type = %stored.job_type,
            scheduled_at = %stored.scheduled_at,
            "job submitted"
        );

        self.shared.wakeup.notify_one();
        Ok(stored)
    }

    /// Request cancellation. Returns `false` for unknown or already
    /// terminal jobs.
    ///
    /// A claimable job is flipped to `Cancelled` outright and will never be
    /// dispatched. A running job has its local token cancelled and its row
    /// flipped immediately; the worker observes the token on its own time
    /// (best-effort, not synchronous).
    pub async fn cancel(&self, id: Uuid) -> JobResult<bool> {
        let Some(job) = self.shared.store.get(id).await? else {
            return Ok(false);
        };

        if job.status.is_terminal() {
            return Ok(false);
        }

        if job.status.is_claimable() {
            let rows = self.shared.store.cancel_if_claimable(id, Utc::now()).await?;
            if rows > 0 {
                tracing::info!(job_id = %id, "cancelled before dispatch");
                self.push_update(&job, JobStatus::Cancelled);
                return Ok(true);
            }
            // Lost the race to a claim; fall through and treat as running.
        }

        if let Some(token) = self.shared.remove_running(id) {
            token.cancel();
        }
        let rows = self.shared.store.cancel_if_running(id, Utc::now()).await?;
        if rows == 0 {
            // The worker reached a terminal state first.
            return Ok(false);
        }

        tracing::info!(job_id = %id, "cancellation requested for running job");
        self.push_update(&job, JobStatus::Cancelled);
        Ok(true)
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: Uuid) -> JobResult<Option<JobRecord>> {
        Ok(self.shared.store.get(id).await?)
    }

    /// Snapshot of engine-wide counters.
    pub async fn statistics(&self) -> JobResult<JobStatistics> {
        let count_by_status = self.shared.store.status_counts().await?;
        let total = count_by_status.values().sum();

        Ok(JobStatistics {
            count_by_status,
            total,
            running_local: self.shared.running_count(),
            pool_size: self.shared.config.worker_count,
        })
    }

    fn push_update(&self, job: &JobRecord, status: JobStatus) {
        notify::publish_best_effort(
            Arc::clone(&self.shared.sink),
            JobUpdate {
                job_id: job.id,
                job_type: job.job_type.clone(),
                status,
                progress: job.progress,
                current_step: job.current_step.clone(),
                error_message: None,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }
}
