//! End-to-end engine scenarios against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::jobs::engine::JobEngine;
use crate::jobs::error::JobError;
use crate::jobs::registry::ExecutorRegistry;
use crate::jobs::types::{JobContext, JobExecutor, JobParameters, JobStatus};
use crate::jobs::{scheduler, sweeper, watchdog};
use crate::notify::NoopSink;
use crate::store::{InMemoryJobStore, JobStore};

struct EchoExecutor;

#[async_trait]
impl JobExecutor for EchoExecutor {
    fn job_type(&self) -> &str {
        "echo"
    }

    fn validate_parameters(&self, params: &JobParameters) -> Result<(), JobError> {
        if params.contains_key("msg") {
            Ok(())
        } else {
            Err(JobError::InvalidParameters {
                job_type: "echo".to_string(),
                reason: "missing required parameter: msg".to_string(),
            })
        }
    }

    async fn execute(&self, ctx: JobContext) -> anyhow::Result<Option<JsonValue>> {
        let msg = ctx.param("msg").unwrap_or_default();
        ctx.progress.report(50, "echoing").await;
        Ok(Some(json!({ "echo": msg })))
    }
}

struct FailingExecutor {
    retryable: bool,
}

#[async_trait]
impl JobExecutor for FailingExecutor {
    fn job_type(&self) -> &str {
        "always-fails"
    }

    async fn execute(&self, _ctx: JobContext) -> anyhow::Result<Option<JsonValue>> {
        Err(anyhow::anyhow!("upstream unavailable"))
    }

    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn retry_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

struct SlowExecutor;

#[async_trait]
impl JobExecutor for SlowExecutor {
    fn job_type(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _ctx: JobContext) -> anyhow::Result<Option<JsonValue>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }
}

/// Works for a moment, then fails. The delay leaves a window for another
/// actor to act on the row while the worker is still executing.
struct SlowFailingExecutor;

#[async_trait]
impl JobExecutor for SlowFailingExecutor {
    fn job_type(&self) -> &str {
        "slow-fail"
    }

    async fn execute(&self, _ctx: JobContext) -> anyhow::Result<Option<JsonValue>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Err(anyhow::anyhow!("flaky downstream"))
    }

    fn retry_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        worker_count: 4,
        scheduler_tick_secs: 1,
        ..EngineConfig::default()
    }
}

fn build_engine(
    executors: Vec<Arc<dyn JobExecutor>>,
    config: EngineConfig,
) -> (JobEngine, Arc<InMemoryJobStore>) {
    let store = Arc::new(InMemoryJobStore::new());
    let mut registry = ExecutorRegistry::new();
    for executor in executors {
        registry
            .register(executor)
            .expect("duplicate executor in test wiring");
    }

    let engine = JobEngine::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        registry,
        Arc::new(NoopSink),
        config,
    );
    (engine, store)
}

/// A second engine instance on an already shared store, as in a
/// horizontally scaled deployment.
fn engine_sharing(
    store: &Arc<InMemoryJobStore>,
    executor: Arc<dyn JobExecutor>,
) -> JobEngine {
    let mut registry = ExecutorRegistry::new();
    registry.register(executor).unwrap();
    JobEngine::new(
        Arc::clone(store) as Arc<dyn JobStore>,
        registry,
        Arc::new(NoopSink),
        test_config(),
    )
}

fn msg_params(msg: &str) -> JobParameters {
    HashMap::from([("msg".to_string(), msg.to_string())])
}

async fn wait_for_status(store: &InMemoryJobStore, id: Uuid, status: JobStatus) {
    for _ in 0..200 {
        if let Ok(Some(job)) = store.get(id).await {
            if job.status == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {status}");
}

#[tokio::test]
async fn echo_job_runs_to_completion() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let job = engine
        .submit("echo", msg_params("hi"), Some("tester".to_string()), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let dispatched = scheduler::tick(engine.shared()).await.unwrap();
    assert_eq!(dispatched, 1);

    wait_for_status(&store, job.id, JobStatus::Completed).await;
    let done = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(done.progress, 100);
    assert_eq!(done.result, Some(json!({ "echo": "hi" })));
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn unknown_job_type_is_rejected_before_persisting() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let err = engine
        .submit("does-not-exist", JobParameters::new(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::UnknownJobType { job_type } if job_type == "does-not-exist"));
    assert!(store.status_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_parameters_leave_no_record() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let err = engine
        .submit("echo", JobParameters::new(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidParameters { .. }));
    assert!(store.status_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_job_exhausts_retries_then_fails() {
    let (engine, store) = build_engine(
        vec![Arc::new(FailingExecutor { retryable: true })],
        test_config(),
    );

    let job = engine
        .submit("always-fails", JobParameters::new(), None, None)
        .await
        .unwrap();

    // Zero retry delay keeps each rescheduled attempt immediately due, so
    // repeated ticks walk the job through all attempts.
    for _ in 0..200 {
        scheduler::tick(engine.shared()).await.unwrap();
        let current = store.get(job.id).await.unwrap().unwrap();
        if current.status == JobStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, failed.max_retries);
    assert_eq!(failed.retry_count, 3);
    let message = failed.error_message.unwrap();
    assert!(message.contains("upstream unavailable"));
    assert!(failed.stack_trace.is_some());
}

#[tokio::test]
async fn non_retryable_failure_is_terminal_on_first_attempt() {
    let (engine, store) = build_engine(
        vec![Arc::new(FailingExecutor { retryable: false })],
        test_config(),
    );

    let job = engine
        .submit("always-fails", JobParameters::new(), None, None)
        .await
        .unwrap();
    scheduler::tick(engine.shared()).await.unwrap();

    wait_for_status(&store, job.id, JobStatus::Failed).await;
    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn cancelled_pending_job_is_never_dispatched() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let job = engine
        .submit_scheduled(
            "echo",
            msg_params("later"),
            Utc::now() + chrono::Duration::hours(1),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(engine.cancel(job.id).await.unwrap());
    let cancelled = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());

    assert_eq!(scheduler::tick(engine.shared()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelling_running_job_stops_it() {
    let (engine, store) = build_engine(vec![Arc::new(SlowExecutor)], test_config());

    let job = engine
        .submit("slow", JobParameters::new(), None, None)
        .await
        .unwrap();
    assert_eq!(scheduler::tick(engine.shared()).await.unwrap(), 1);
    wait_for_status(&store, job.id, JobStatus::Running).await;

    assert!(engine.cancel(job.id).await.unwrap());
    wait_for_status(&store, job.id, JobStatus::Cancelled).await;

    // The supervisor observes the token and exits without a terminal write
    // of its own; the local bookkeeping drains.
    for _ in 0..200 {
        if engine.shared().running_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("running map never drained after cancellation");
}

#[tokio::test]
async fn cancelling_retrying_job_prevents_redispatch() {
    let (engine, store) = build_engine(
        vec![Arc::new(FailingExecutor { retryable: true })],
        test_config(),
    );

    let job = engine
        .submit("always-fails", JobParameters::new(), None, None)
        .await
        .unwrap();
    scheduler::tick(engine.shared()).await.unwrap();
    wait_for_status(&store, job.id, JobStatus::Retrying).await;

    assert!(engine.cancel(job.id).await.unwrap());
    let cancelled = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // The zero retry delay makes the row due immediately; only the
    // cancellation keeps it out of the claim set.
    assert_eq!(scheduler::tick(engine.shared()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_job_is_not_resurrected_by_a_late_retry() {
    let store = Arc::new(InMemoryJobStore::new());
    let runner = engine_sharing(&store, Arc::new(SlowFailingExecutor));
    let other = engine_sharing(&store, Arc::new(SlowFailingExecutor));

    let job = runner
        .submit("slow-fail", JobParameters::new(), None, None)
        .await
        .unwrap();
    assert_eq!(scheduler::tick(runner.shared()).await.unwrap(), 1);
    wait_for_status(&store, job.id, JobStatus::Running).await;

    // The other instance holds no token for this job, so its worker keeps
    // executing and only the row flips.
    assert!(other.cancel(job.id).await.unwrap());
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );

    // Wait out the worker's failure; the retry path must leave the
    // terminal row alone.
    for _ in 0..100 {
        if runner.shared().running_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Cancelled
    );
    assert_eq!(scheduler::tick(runner.shared()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_is_a_noop_for_terminal_and_unknown_jobs() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let job = engine
        .submit("echo", msg_params("done"), None, None)
        .await
        .unwrap();
    scheduler::tick(engine.shared()).await.unwrap();
    wait_for_status(&store, job.id, JobStatus::Completed).await;

    assert!(!engine.cancel(job.id).await.unwrap());
    assert!(!engine.cancel(Uuid::new_v4()).await.unwrap());

    // Terminal rows are immune to conditional transitions as well.
    let rows = store
        .update_status_if_equals(job.id, JobStatus::Completed, JobStatus::Running)
        .await
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn watchdog_fails_jobs_stuck_in_running() {
    let (engine, store) = build_engine(vec![Arc::new(SlowExecutor)], test_config());

    let job = engine
        .submit("slow", JobParameters::new(), None, None)
        .await
        .unwrap();
    scheduler::tick(engine.shared()).await.unwrap();
    wait_for_status(&store, job.id, JobStatus::Running).await;

    store.backdate_started_at(job.id, Utc::now() - chrono::Duration::hours(2));

    assert_eq!(watchdog::scan(engine.shared()).await.unwrap(), 1);
    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Job execution timed out after 3600s")
    );
}

#[tokio::test]
async fn watchdog_ignores_fresh_running_jobs() {
    let (engine, store) = build_engine(vec![Arc::new(SlowExecutor)], test_config());

    let job = engine
        .submit("slow", JobParameters::new(), None, None)
        .await
        .unwrap();
    scheduler::tick(engine.shared()).await.unwrap();
    wait_for_status(&store, job.id, JobStatus::Running).await;

    // One second inside the stuck window: still considered healthy.
    store.backdate_started_at(
        job.id,
        Utc::now() - chrono::Duration::seconds(3600 - 1),
    );

    assert_eq!(watchdog::scan(engine.shared()).await.unwrap(), 0);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Running
    );
}

#[tokio::test]
async fn pool_size_bounds_concurrent_dispatch() {
    let config = EngineConfig {
        worker_count: 10,
        ..test_config()
    };
    let (engine, store) = build_engine(vec![Arc::new(SlowExecutor)], config);

    futures::future::try_join_all(
        (0..50).map(|_| engine.submit("slow", JobParameters::new(), None, None)),
    )
    .await
    .unwrap();

    assert_eq!(scheduler::tick(engine.shared()).await.unwrap(), 10);

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.get(&JobStatus::Running), Some(&10));
    assert_eq!(counts.get(&JobStatus::Pending), Some(&40));

    // All slots taken; the next tick dispatches nothing.
    assert_eq!(scheduler::tick(engine.shared()).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_schedulers_claim_a_job_at_most_once() {
    let store = Arc::new(InMemoryJobStore::new());
    let engine_a = engine_sharing(&store, Arc::new(SlowExecutor));
    let engine_b = engine_sharing(&store, Arc::new(SlowExecutor));

    engine_a
        .submit("slow", JobParameters::new(), None, None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        scheduler::tick(engine_a.shared()),
        scheduler::tick(engine_b.shared()),
    );
    assert_eq!(a.unwrap() + b.unwrap(), 1);

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.get(&JobStatus::Running), Some(&1));
}

#[tokio::test]
async fn sweeper_purges_only_old_terminal_jobs() {
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    let old = engine
        .submit("echo", msg_params("old"), None, None)
        .await
        .unwrap();
    let recent = engine
        .submit("echo", msg_params("recent"), None, None)
        .await
        .unwrap();
    let pending = engine
        .submit_scheduled(
            "echo",
            msg_params("future"),
            Utc::now() + chrono::Duration::hours(1),
            None,
            None,
        )
        .await
        .unwrap();

    scheduler::tick(engine.shared()).await.unwrap();
    wait_for_status(&store, old.id, JobStatus::Completed).await;
    wait_for_status(&store, recent.id, JobStatus::Completed).await;

    let retention = chrono::Duration::days(30);
    store.backdate_completed_at(
        old.id,
        Utc::now() - retention - chrono::Duration::seconds(1),
    );
    store.backdate_completed_at(
        recent.id,
        Utc::now() - retention + chrono::Duration::seconds(1),
    );

    assert_eq!(sweeper::sweep(engine.shared()).await.unwrap(), 1);
    assert!(store.get(old.id).await.unwrap().is_none());
    assert!(store.get(recent.id).await.unwrap().is_some());
    assert!(store.get(pending.id).await.unwrap().is_some());
}

#[tokio::test]
async fn statistics_reflect_store_and_pool() {
    let (engine, _store) = build_engine(vec![Arc::new(EchoExecutor)], test_config());

    for i in 0..3 {
        engine
            .submit_scheduled(
                "echo",
                msg_params(&format!("m{i}")),
                Utc::now() + chrono::Duration::hours(1),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let stats = engine.statistics().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count_by_status.get(&JobStatus::Pending), Some(&3));
    assert_eq!(stats.running_local, 0);
    assert_eq!(stats.pool_size, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_engine_runs_jobs_and_shuts_down() {
    let config = EngineConfig {
        shutdown_grace_secs: 2,
        ..test_config()
    };
    let (engine, store) = build_engine(vec![Arc::new(EchoExecutor)], config);

    engine.start();
    // Idempotent.
    engine.start();

    let job = engine
        .submit("echo", msg_params("looped"), None, None)
        .await
        .unwrap();

    wait_for_status(&store, job.id, JobStatus::Completed).await;
    engine.shutdown().await;
}
