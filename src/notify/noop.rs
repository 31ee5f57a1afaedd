//! No-op status sink.
//!
//! Used when no push destination is configured. All publishes succeed
//! without doing anything.

use async_trait::async_trait;

use crate::error::AppResult;

use super::{JobUpdate, StatusSink};

pub struct NoopSink;

impl NoopSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSink for NoopSink {
    async fn publish(&self, _update: &JobUpdate) -> AppResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
