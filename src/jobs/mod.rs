//! Background job engine: submission, claiming, execution, retry,
//! watchdog reconciliation and retention.

pub mod engine;
pub mod error;
pub mod models;
pub mod registry;
pub mod retry;
pub mod types;

mod scheduler;
mod supervisor;
mod sweeper;
mod watchdog;

#[cfg(test)]
mod tests;

pub use engine::{JobEngine, JobStatistics};
pub use error::{JobError, JobResult};
pub use models::{JobRecord, NewJobRecord};
pub use registry::ExecutorRegistry;
pub use types::{JobContext, JobExecutor, JobParameters, JobStatus, ProgressReporter};
