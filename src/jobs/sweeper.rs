//! Retention sweeper: purges old terminal jobs.

use std::sync::Arc;

use chrono::Utc;

use crate::jobs::engine::EngineShared;
use crate::jobs::error::JobResult;

pub(crate) async fn run(shared: Arc<EngineShared>) {
    tracing::debug!("sweeper loop started");

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(shared.config.sweeper_period()) => {}
        }

        if shared.shutdown.is_cancelled() {
            break;
        }

        match sweep(&shared).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(purged = n, "retention sweep complete"),
            Err(e) => tracing::error!(error = %e, "retention sweep failed"),
        }
    }

    tracing::debug!("sweeper loop stopped");
}

/// Delete terminal jobs whose `completed_at` is older than the retention
/// window. Pending, running and retrying jobs are never touched.
pub(crate) async fn sweep(shared: &Arc<EngineShared>) -> JobResult<u64> {
    let cutoff = Utc::now() - shared.config.retention_age();
    Ok(shared.store.purge_terminal(cutoff).await?)
}
