//! Job row models.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::types::{JobParameters, JobStatus};
use crate::schema::background_jobs;

/// One persisted unit of background work.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = background_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRecord {
    pub id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub parameters: JsonValue,
    pub progress: i32,
    pub current_step: Option<String>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub created_by: Option<String>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Parameters as the flat string map producers submitted.
    pub fn parameters_map(&self) -> JobParameters {
        match &self.parameters {
            JsonValue::Object(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => JobParameters::new(),
        }
    }
}

/// Insertable row for a newly submitted job.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = background_jobs)]
pub struct NewJobRecord {
    pub id: Uuid,
    pub job_type: String,
    pub status: JobStatus,
    pub parameters: JsonValue,
    pub progress: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub created_by: Option<String>,
}

impl NewJobRecord {
    /// Build a pending row from a producer submission.
    pub fn pending(
        job_type: impl Into<String>,
        parameters: &JobParameters,
        scheduled_at: DateTime<Utc>,
        max_retries: i32,
        created_by: Option<String>,
        tenant_id: Option<String>,
    ) -> Self {
        let parameters = JsonValue::Object(
            parameters
                .iter()
                .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
                .collect(),
        );

        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            parameters,
            progress: 0,
            retry_count: 0,
            max_retries,
            scheduled_at,
            created_at: Utc::now(),
            tenant_id,
            created_by,
        }
    }
}
