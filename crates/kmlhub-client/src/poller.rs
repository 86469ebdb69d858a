//! Status poller
//!
//! Follows an analysis job on a fixed interval and yields
//! [`AnalysisRecord`] snapshots through a [`PollHandle`]. The sequence ends on
//! the first terminal snapshot, when the wall-clock budget runs out, or when
//! the handle is stopped or dropped.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use kmlhub_core::models::{
    AnalysisRecord, AnalysisStatus, BoundingBox, ResultSummary, StatusUpdate,
};

use crate::error::StatusError;
use crate::error_message;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const POLL_BUDGET: Duration = Duration::from_secs(30);

#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Observe the current state of the job behind `record`.
    async fn check(&self, record: &AnalysisRecord) -> Result<StatusUpdate, StatusError>;
}

/// Randomized stand-in for a processing backend.
///
/// Each check picks processing, completed or error by weight; processing
/// advances the progress a little, completed carries a synthesized summary.
pub struct SimulatedStatusSource {
    rng: Mutex<StdRng>,
    weights: [u64; 3],
}

impl SimulatedStatusSource {
    /// Default odds: 70% processing, 25% completed, 5% error.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic source for tests and demos.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            weights: [70, 25, 5],
        }
    }

    /// Override the relative odds of processing, completed and error.
    /// All-zero weights keep the current odds.
    pub fn with_weights(mut self, processing: u32, completed: u32, error: u32) -> Self {
        let weights = [processing, completed, error].map(u64::from);
        if weights.iter().sum::<u64>() > 0 {
            self.weights = weights;
        }
        self
    }

    fn next_update(&self, current_progress: u8) -> StatusUpdate {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let [processing, completed, _] = self.weights;
        let roll = rng.random_range(0..self.weights.iter().sum::<u64>());

        if roll < processing {
            let step = rng.random_range(5..=20u8);
            StatusUpdate::processing(current_progress.saturating_add(step).min(95))
        } else if roll < processing + completed {
            StatusUpdate {
                status: AnalysisStatus::Completed,
                progress_percent: 100,
                result_summary: Some(synthesize_summary(&mut *rng)),
                error: None,
            }
        } else {
            StatusUpdate::failed("Analysis failed: geometry could not be parsed")
        }
    }
}

impl Default for SimulatedStatusSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSource for SimulatedStatusSource {
    async fn check(&self, record: &AnalysisRecord) -> Result<StatusUpdate, StatusError> {
        Ok(self.next_update(record.progress_percent))
    }
}

/// Plausible analysis statistics for a completed simulated job.
fn synthesize_summary<R: Rng>(rng: &mut R) -> ResultSummary {
    let point_count = rng.random_range(0..=500u32);
    let line_count = rng.random_range(0..=120u32);
    let polygon_count = rng.random_range(1..=80u32);

    let mut geometry_types = Vec::new();
    if point_count > 0 {
        geometry_types.push("Point".to_string());
    }
    if line_count > 0 {
        geometry_types.push("LineString".to_string());
    }
    geometry_types.push("Polygon".to_string());

    let min_lon = rng.random_range(-179.0..170.0f64);
    let min_lat = rng.random_range(-89.0..80.0f64);
    let bounding_box = BoundingBox {
        min_lon,
        min_lat,
        max_lon: min_lon + rng.random_range(0.01..9.0f64),
        max_lat: min_lat + rng.random_range(0.01..9.0f64),
    };

    ResultSummary {
        feature_count: point_count + line_count + polygon_count,
        geometry_types,
        bounding_box,
        point_count,
        line_count,
        polygon_count,
    }
}

/// Queries `GET {status_url}/{tracking_id}` and expects a status update body.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: Client,
    status_url: String,
}

impl HttpStatusSource {
    pub fn new(client: Client, status_url: impl Into<String>) -> Self {
        Self {
            client,
            status_url: status_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn check(&self, record: &AnalysisRecord) -> Result<StatusUpdate, StatusError> {
        let url = format!("{}/{}", self.status_url, record.tracking_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(StatusError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(StatusError::Rejected {
                status_code: status.as_u16(),
                message,
            });
        }

        response
            .json::<StatusUpdate>()
            .await
            .map_err(|e| StatusError::MalformedResponse(e.to_string()))
    }
}

/// Drives a [`StatusSource`] on a timer.
#[derive(Clone)]
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    budget: Duration,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            interval: POLL_INTERVAL,
            budget: POLL_BUDGET,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Start polling the job described by `record`.
    pub fn poll(&self, record: AnalysisRecord) -> PollHandle {
        self.poll_with_token(record, CancellationToken::new())
    }

    /// Start polling under an existing cancellation token, so an owner can
    /// stop every poll it started at once.
    pub fn poll_with_token(&self, record: AnalysisRecord, token: CancellationToken) -> PollHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::clone(&self.source);
        let period = self.interval.max(Duration::from_millis(1));
        let budget = self.budget;
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            let mut record = record;
            let tracking_id = record.tracking_id.clone();
            let deadline = sleep(budget);
            tokio::pin!(deadline);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        tracing::debug!(tracking_id = %tracking_id, "Status polling stopped");
                        break;
                    }
                    _ = &mut deadline => {
                        tracing::warn!(
                            tracking_id = %tracking_id,
                            budget_secs = budget.as_secs(),
                            "Status polling budget elapsed before a terminal status"
                        );
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let checked = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = &mut deadline => {
                        tracing::warn!(tracking_id = %tracking_id, "Status polling budget elapsed during a check");
                        break;
                    }
                    checked = source.check(&record) => checked,
                };

                let update = match checked {
                    Ok(update) => update,
                    Err(e) => {
                        tracing::warn!(tracking_id = %tracking_id, error = %e, "Status check failed");
                        StatusUpdate::failed(e.to_string())
                    }
                };
                record.apply(update);

                let terminal = record.is_terminal();
                if tx.send(record.clone()).is_err() {
                    break;
                }
                if terminal {
                    tracing::info!(
                        tracking_id = %tracking_id,
                        status = %record.status,
                        "Analysis reached a terminal status"
                    );
                    break;
                }
            }
        });

        PollHandle { rx, token, task }
    }
}

/// Receiving end of a running poll. Dropping it cancels the poll.
#[derive(Debug)]
pub struct PollHandle {
    rx: mpsc::UnboundedReceiver<AnalysisRecord>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Next snapshot, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<AnalysisRecord> {
        self.rx.recv().await
    }

    /// Stop polling. Snapshots already produced can still be read.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }

    /// Read snapshots until the sequence ends and return the last one.
    pub async fn last(mut self) -> Option<AnalysisRecord> {
        let mut last = None;
        while let Some(record) = self.next().await {
            last = Some(record);
        }
        last
    }
}

impl Stream for PollHandle {
    type Item = AnalysisRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
