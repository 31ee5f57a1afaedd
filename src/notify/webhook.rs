//! Webhook status sink.
//!
//! POSTs each job update as JSON to a configured URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

use super::{JobUpdate, StatusSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSinkConfig {
    /// Destination URL for update pushes.
    pub url: String,
    /// Extra request headers (e.g. authorization).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

pub struct WebhookSink {
    config: WebhookSinkConfig,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: WebhookSinkConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal {
                source: anyhow::Error::from(e),
            })?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl StatusSink for WebhookSink {
    async fn publish(&self, update: &JobUpdate) -> AppResult<()> {
        let mut request = self.client.post(&self.config.url).json(update);

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;

        if !response.status().is_success() {
            return Err(AppError::Internal {
                source: anyhow::anyhow!(
                    "webhook returned status {} for job {}",
                    response.status(),
                    update.job_id
                ),
            });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
