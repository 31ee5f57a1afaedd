//! Jobmill Library
//!
//! Persistence-backed background job execution engine: submission, claiming,
//! worker-pool execution, retry/backoff, stuck-job detection and retention.

use shadow_rs::shadow;
shadow!(build);

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod notify;
pub mod schema;
pub mod store;

pub use jobs::{JobEngine, JobExecutor, JobStatistics};
pub use store::JobStore;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}
