//! Post-upload notification
//!
//! Tells the processing backend that a file is stored and returns the
//! tracking id of the analysis job. [`SimulatedNotifier`] stands in when no
//! backend is configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::Client;

use kmlhub_core::models::{ProcessingTriggerRequest, ProcessingTriggerResponse};

use crate::error::NotifyError;
use crate::error_message;

/// Delay of the simulated processing hand-off.
pub const SIMULATED_NOTIFY_DELAY: Duration = Duration::from_secs(2);

const TRACKING_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TRACKING_ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyReceipt {
    pub tracking_id: String,
}

#[async_trait]
pub trait ProcessingNotifier: Send + Sync {
    /// Announce a stored file. Returns the tracking id of the analysis job.
    async fn notify(&self, file_key: &str) -> Result<NotifyReceipt, NotifyError>;
}

/// New tracking id: `analysis-{unix_millis}-{9 chars of [a-z0-9]}`.
pub fn generate_tracking_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TRACKING_ID_SUFFIX_LEN)
        .map(|_| TRACKING_ID_ALPHABET[rng.random_range(0..TRACKING_ID_ALPHABET.len())] as char)
        .collect();
    format!("analysis-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Waits a fixed delay and hands out a fresh tracking id. Never fails.
#[derive(Debug, Clone)]
pub struct SimulatedNotifier {
    delay: Duration,
}

impl SimulatedNotifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedNotifier {
    fn default() -> Self {
        Self::new(SIMULATED_NOTIFY_DELAY)
    }
}

#[async_trait]
impl ProcessingNotifier for SimulatedNotifier {
    async fn notify(&self, file_key: &str) -> Result<NotifyReceipt, NotifyError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let tracking_id = generate_tracking_id();
        tracing::info!(file_key = %file_key, tracking_id = %tracking_id, "Simulated processing started");
        Ok(NotifyReceipt { tracking_id })
    }
}

/// Posts `{ "fileKey" }` to a processing trigger endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    trigger_url: String,
}

impl HttpNotifier {
    pub fn new(client: Client, trigger_url: impl Into<String>) -> Self {
        Self {
            client,
            trigger_url: trigger_url.into(),
        }
    }
}

#[async_trait]
impl ProcessingNotifier for HttpNotifier {
    #[tracing::instrument(skip(self), fields(trigger_url = %self.trigger_url))]
    async fn notify(&self, file_key: &str) -> Result<NotifyReceipt, NotifyError> {
        let response = self
            .client
            .post(&self.trigger_url)
            .json(&ProcessingTriggerRequest {
                file_key: file_key.to_string(),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout
                } else {
                    NotifyError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(NotifyError::Rejected {
                status_code: status.as_u16(),
                message,
            });
        }

        let body: ProcessingTriggerResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::MalformedResponse(e.to_string()))?;
        if body.tracking_id.trim().is_empty() {
            return Err(NotifyError::MalformedResponse(
                "response has an empty trackingId".to_string(),
            ));
        }

        tracing::info!(tracking_id = %body.tracking_id, "Processing triggered");
        Ok(NotifyReceipt {
            tracking_id: body.tracking_id,
        })
    }
}
