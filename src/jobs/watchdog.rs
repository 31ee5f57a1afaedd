//! Watchdog loop: fails jobs stuck in `Running`.
//!
//! A row can stay `Running` forever if the process that claimed it died
//! before writing a terminal state. The watchdog reconciles such rows by
//! forcing them to `Failed`. The write is deliberately unconditional: if a
//! worker finishes at the same moment, whichever write lands last wins,
//! and both outcomes are terminal.

use std::sync::Arc;

use chrono::Utc;

use crate::jobs::engine::EngineShared;
use crate::jobs::error::JobResult;
use crate::jobs::types::JobStatus;
use crate::notify::{self, JobUpdate};

pub(crate) async fn run(shared: Arc<EngineShared>) {
    tracing::debug!("watchdog loop started");

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(shared.config.watchdog_period()) => {}
        }

        if shared.shutdown.is_cancelled() {
            break;
        }

        match scan(&shared).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(reclaimed = n, "watchdog failed stuck jobs"),
            Err(e) => tracing::error!(error = %e, "watchdog scan failed"),
        }
    }

    tracing::debug!("watchdog loop stopped");
}

/// One watchdog pass. Returns the number of jobs forced to `Failed`.
pub(crate) async fn scan(shared: &Arc<EngineShared>) -> JobResult<usize> {
    let timeout_secs = shared.config.stuck_timeout_secs;
    let cutoff = Utc::now() - chrono::Duration::seconds(timeout_secs as i64);
    let stuck = shared.store.stuck(cutoff).await?;
    let mut count = 0;

    for job in stuck {
        let message = format!("Job execution timed out after {timeout_secs}s");
        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            started_at = ?job.started_at,
            "forcing stuck job to failed"
        );

        // One bad write must not starve the rest of the batch; the next
        // pass picks up anything skipped here.
        if let Err(e) = shared.store.fail(job.id, &message, None, Utc::now()).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to record watchdog failure");
            continue;
        }
        count += 1;

        // If the job was ours, stop the local task too.
        if let Some(token) = shared.remove_running(job.id) {
            token.cancel();
        }

        notify::publish_best_effort(
            Arc::clone(&shared.sink),
            JobUpdate {
                job_id: job.id,
                job_type: job.job_type,
                status: JobStatus::Failed,
                progress: job.progress,
                current_step: job.current_step,
                error_message: Some(message),
            },
        );
    }

    Ok(count)
}
