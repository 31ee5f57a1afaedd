//! Explicit job-type to executor registry.
//!
//! Populated once at startup by the host wiring; there is no runtime
//! discovery. Submission fails fast when the requested type is absent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::JobExecutor;

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its declared job type.
    pub fn register(&mut self, executor: Arc<dyn JobExecutor>) -> JobResult<()> {
        let job_type = executor.job_type().to_string();
        if self.executors.contains_key(&job_type) {
            return Err(JobError::DuplicateExecutor { job_type });
        }

        tracing::debug!(job_type = %job_type, "registered job executor");
        self.executors.insert(job_type, executor);
        Ok(())
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobContext;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    struct Echo;

    #[async_trait]
    impl JobExecutor for Echo {
        fn job_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, _ctx: JobContext) -> anyhow::Result<Option<JsonValue>> {
            Ok(None)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();

        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();

        let err = registry.register(Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, JobError::DuplicateExecutor { job_type } if job_type == "echo"));
    }
}
