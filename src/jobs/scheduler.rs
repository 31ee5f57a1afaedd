//! Scheduler loop: claims due jobs and hands them to workers.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::jobs::engine::EngineShared;
use crate::jobs::error::JobResult;
use crate::jobs::models::JobRecord;
use crate::jobs::retry::jitter;
use crate::jobs::supervisor;
use crate::jobs::types::JobStatus;

/// Fraction by which each sleep is spread, so several engine instances
/// polling the same store drift apart instead of stampeding together.
const TICK_JITTER: f64 = 0.1;

pub(crate) async fn run(shared: Arc<EngineShared>) {
    tracing::debug!("scheduler loop started");

    loop {
        let sleep = jitter(shared.config.scheduler_tick(), TICK_JITTER);
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.wakeup.notified() => {}
            _ = tokio::time::sleep(sleep) => {}
        }

        if shared.shutdown.is_cancelled() {
            break;
        }

        match tick(&shared).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(dispatched = n, "scheduler tick"),
            Err(e) => tracing::error!(error = %e, "scheduler tick failed"),
        }
    }

    tracing::debug!("scheduler loop stopped");
}

/// One scheduling pass. Returns the number of jobs dispatched.
///
/// Fetches at most as many due jobs as there are free worker slots, then
/// claims each with a conditional status update. A zero-row update means
/// another instance won the job and it is skipped without error. This
/// conditional write is the only claim arbitration in the system.
pub(crate) async fn tick(shared: &Arc<EngineShared>) -> JobResult<usize> {
    let free = shared.slots.available_permits();
    if free == 0 {
        return Ok(0);
    }

    let now = Utc::now();
    let due = shared.store.claimable(now, free as i64).await?;
    let mut dispatched = 0;

    for job in due {
        let claimed = shared
            .store
            .update_status_if_equals(job.id, job.status, JobStatus::Running)
            .await?;

        if claimed == 0 {
            tracing::debug!(job_id = %job.id, "claim lost to another instance");
            continue;
        }

        dispatched += 1;
        dispatch(shared, job).await;
    }

    Ok(dispatched)
}

/// Hand a claimed job to a worker slot.
///
/// When no slot is free (the availability check raced), the job runs on
/// the scheduler task itself. That stalls further dispatch until a slot
/// opens, which is the intended backpressure.
async fn dispatch(shared: &Arc<EngineShared>, job: JobRecord) {
    let token = CancellationToken::new();
    shared.insert_running(job.id, token.clone());

    match Arc::clone(&shared.slots).try_acquire_owned() {
        Ok(permit) => {
            let worker_shared = Arc::clone(shared);
            shared.workers.spawn(async move {
                let _permit = permit;
                supervisor::run_job(worker_shared, job, token).await;
            });
        }
        Err(_) => {
            tracing::warn!(job_id = %job.id, "worker pool saturated, running job inline");
            supervisor::run_job(Arc::clone(shared), job, token).await;
        }
    }
}
