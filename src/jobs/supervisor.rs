//! Per-job supervisor: runs a claimed job to a terminal state.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::jobs::engine::EngineShared;
use crate::jobs::models::JobRecord;
use crate::jobs::retry::{self, RetryDecision};
use crate::jobs::types::{JobContext, JobExecutor, JobStatus, ProgressReporter};
use crate::notify::{self, JobUpdate};

/// Upper bound on the persisted error chain, in characters.
pub(crate) const MAX_STORED_TRACE: usize = 4000;

/// Drive one claimed job to completion, failure, retry or cancellation.
///
/// The job row is already `Running` when this is called. Every exit path
/// removes the job from the local running map and pushes a final status
/// notification; the cancellation path writes no terminal state itself
/// because [`super::engine::JobEngine::cancel`] already has.
pub(crate) async fn run_job(shared: Arc<EngineShared>, job: JobRecord, token: CancellationToken) {
    let id = job.id;
    let job_type = job.job_type.clone();

    if let Err(e) = shared.store.mark_started(id, Utc::now()).await {
        tracing::error!(job_id = %id, error = %e, "failed to record start time");
    }

    match shared.registry.get(&job_type) {
        Some(executor) => {
            let ctx = JobContext {
                job: job.clone(),
                progress: ProgressReporter::new(
                    Arc::clone(&shared.store),
                    Arc::clone(&shared.sink),
                    id,
                    job_type.clone(),
                ),
                cancellation: token.clone(),
            };

            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(job_id = %id, job_type = %job_type, "job cancelled mid-flight");
                }
                outcome = executor.execute(ctx) => match outcome {
                    Ok(result) => {
                        tracing::info!(job_id = %id, job_type = %job_type, "job completed");
                        if let Err(e) = shared.store.complete(id, result, Utc::now()).await {
                            tracing::error!(job_id = %id, error = %e, "failed to record completion");
                        }
                    }
                    Err(err) => {
                        handle_failure(&shared, executor.as_ref(), &job, err).await;
                    }
                },
            }
        }
        None => {
            // The registry is fixed at startup, so this only happens when a
            // row claimed by this process was written by a deployment with a
            // richer registry. Not retryable here.
            let message = format!("No executor registered for job type: {job_type}");
            tracing::error!(job_id = %id, job_type = %job_type, "{message}");
            if let Err(e) = shared.store.fail(id, &message, None, Utc::now()).await {
                tracing::error!(job_id = %id, error = %e, "failed to record failure");
            }
        }
    }

    shared.remove_running(id);
    push_final_update(&shared, id, &job_type).await;
}

async fn handle_failure(
    shared: &Arc<EngineShared>,
    executor: &dyn JobExecutor,
    job: &JobRecord,
    err: anyhow::Error,
) {
    let message = format!("{err:#}");
    let trace = truncate_chars(&format!("{err:?}"), MAX_STORED_TRACE);

    match retry::decide(executor, job, Utc::now()) {
        RetryDecision::Retry {
            retry_count,
            scheduled_at,
        } => {
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = retry_count,
                max_retries = job.max_retries,
                next_run = %scheduled_at,
                error = %message,
                "job failed, scheduling retry"
            );
            match shared
                .store
                .reschedule(job.id, retry_count, scheduled_at, &message, Some(&trace))
                .await
            {
                Ok(0) => {
                    // The row left Running while we were executing, e.g. a
                    // cancel landed first. Its state stands; no retry.
                    tracing::info!(job_id = %job.id, "job no longer running, dropping retry");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "failed to record retry");
                }
            }
        }
        RetryDecision::Fail => {
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                retries = job.retry_count,
                error = %message,
                "job failed permanently"
            );
            if let Err(e) = shared
                .store
                .fail(job.id, &message, Some(&trace), Utc::now())
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "failed to record failure");
            }
        }
    }
}

/// Push the job's stored state to the sink after the terminal write.
async fn push_final_update(shared: &Arc<EngineShared>, id: uuid::Uuid, job_type: &str) {
    let update = match shared.store.get(id).await {
        Ok(Some(latest)) => JobUpdate {
            job_id: latest.id,
            job_type: latest.job_type,
            status: latest.status,
            progress: latest.progress,
            current_step: latest.current_step,
            error_message: latest.error_message,
        },
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(job_id = %id, error = %e, "could not load job for final notification");
            JobUpdate {
                job_id: id,
                job_type: job_type.to_string(),
                status: JobStatus::Failed,
                progress: 0,
                current_step: None,
                error_message: None,
            }
        }
    };

    notify::publish_best_effort(Arc::clone(&shared.sink), update);
}

/// Truncate on a char boundary so multi-byte errors never split.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
