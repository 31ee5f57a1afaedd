//! Best-effort status push sink.
//!
//! The engine pushes progress and status updates to a pluggable sink.
//! Pushes are fire-and-forget: sink unavailability or failure is logged at
//! the call site and never affects job state.

mod noop;
mod webhook;

pub use noop::NoopSink;
pub use webhook::{WebhookSink, WebhookSinkConfig};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::jobs::types::JobStatus;

/// One status/progress update for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: i32,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
}

/// Destination for job status pushes (websocket bridge, webhook, ...).
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one update. Errors are reported to the caller for logging
    /// only; they must never influence the job outcome.
    async fn publish(&self, update: &JobUpdate) -> AppResult<()>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Push an update without waiting for, or failing on, delivery.
pub fn publish_best_effort(sink: Arc<dyn StatusSink>, update: JobUpdate) {
    tokio::spawn(async move {
        if let Err(e) = sink.publish(&update).await {
            tracing::warn!(
                sink = sink.name(),
                job_id = %update.job_id,
                error = %e,
                "status sink push failed"
            );
        }
    });
}
