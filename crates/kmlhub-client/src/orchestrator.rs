//! Upload orchestrator
//!
//! Owns the visible [`UploadState`] of one upload attempt and sequences the
//! pipeline stages: validate on select, then credentials, transfer and
//! notification on start. Every transition is published on a
//! `tokio::sync::watch` channel; the orchestrator is its only writer.
//!
//! ```text
//! Idle --start_upload--> Uploading --> Success | Error
//!   ^                                      |
//!   +---------------- reset ---------------+
//! ```
//!
//! A validation failure puts the state in `Error` but leaves the attempt
//! open: selecting another file clears it. Once `start_upload` has run, only
//! `reset` begins a new attempt.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::Client;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use kmlhub_core::config::{ClientConfig, TransferMode};
use kmlhub_core::models::{
    AnalysisRecord, TransferProgress, UploadCredentials, UploadRequest, UploadState,
};
use kmlhub_core::FileValidator;

use crate::credentials::CredentialRequester;
use crate::error::UploadError;
use crate::http_client;
use crate::notifier::{HttpNotifier, ProcessingNotifier, SimulatedNotifier};
use crate::poller::{
    HttpStatusSource, PollHandle, SimulatedStatusSource, StatusPoller, StatusSource, POLL_BUDGET,
    POLL_INTERVAL,
};
use crate::transfer::TransferAgent;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub file_key: String,
    pub tracking_id: String,
    /// Initial analysis record, handed to the status poller.
    pub record: AnalysisRecord,
}

type CompletionHook = Box<dyn Fn(&UploadOutcome) + Send + Sync>;

struct SelectedFile {
    request: UploadRequest,
    data: Bytes,
}

/// Everything that belongs to the current attempt and is discarded by reset.
struct Attempt {
    selected: Option<SelectedFile>,
    credentials: Option<UploadCredentials>,
    outcome: Option<UploadOutcome>,
    started: bool,
    timers: CancellationToken,
}

impl Attempt {
    fn new(timers: CancellationToken) -> Self {
        Self {
            selected: None,
            credentials: None,
            outcome: None,
            started: false,
            timers,
        }
    }
}

pub struct UploadOrchestrator {
    validator: FileValidator,
    requester: CredentialRequester,
    transfer: TransferAgent,
    transfer_mode: TransferMode,
    notifier: Arc<dyn ProcessingNotifier>,
    client: Client,
    status_url: Option<String>,
    poll_interval: Duration,
    poll_budget: Duration,
    state: watch::Sender<UploadState>,
    attempt: Mutex<Attempt>,
    root: CancellationToken,
    on_complete: Option<CompletionHook>,
}

impl UploadOrchestrator {
    /// Build the full pipeline from client configuration.
    ///
    /// The HTTP notifier is used when `processing_trigger_url` is set, the
    /// simulated one otherwise.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let client = http_client()?;
        let transfer_client = Client::builder()
            .build()
            .context("Failed to create transfer HTTP client")?;

        let notifier: Arc<dyn ProcessingNotifier> = match &config.processing_trigger_url {
            Some(url) => Arc::new(HttpNotifier::new(client.clone(), url.clone())),
            None => Arc::new(SimulatedNotifier::new(config.notify_delay)),
        };

        let root = CancellationToken::new();
        let (state, _) = watch::channel(UploadState::Idle);

        Ok(Self {
            validator: config.validator(),
            requester: CredentialRequester::new(client.clone(), config.api_url.clone()),
            transfer: TransferAgent::new(transfer_client, config.transfer_timeout),
            transfer_mode: config.transfer_mode,
            notifier,
            client,
            status_url: config.status_url.clone(),
            poll_interval: config.poll_interval,
            poll_budget: config.poll_budget,
            state,
            attempt: Mutex::new(Attempt::new(root.child_token())),
            root,
            on_complete: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProcessingNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_transfer_agent(mut self, transfer: TransferAgent) -> Self {
        self.transfer = transfer;
        self
    }

    /// Register a callback run after every successful upload.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&UploadOutcome) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub async fn selected_file(&self) -> Option<UploadRequest> {
        let attempt = self.attempt.lock().await;
        attempt.selected.as_ref().map(|s| s.request.clone())
    }

    pub async fn credentials(&self) -> Option<UploadCredentials> {
        self.attempt.lock().await.credentials.clone()
    }

    pub async fn outcome(&self) -> Option<UploadOutcome> {
        self.attempt.lock().await.outcome.clone()
    }

    fn publish(&self, state: UploadState) {
        self.state.send_replace(state);
    }

    /// Select and validate a file. A failed validation sets `Error` and
    /// clears the selection; selecting again starts over.
    pub async fn select_file(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<UploadRequest, UploadError> {
        let mut attempt = self.attempt.lock().await;
        let state = self.state();
        if state.is_uploading() {
            return Err(UploadError::ConcurrentUpload);
        }
        if attempt.started {
            return Err(UploadError::InvalidState {
                action: "select a file",
                state: state_name(&state).to_string(),
            });
        }

        let data = data.into();
        let request = UploadRequest::new(file_name, mime_type, data.len() as u64);
        attempt.credentials = None;

        match self.validator.validate(&request) {
            Ok(()) => {
                tracing::debug!(
                    file_name = %request.file_name,
                    size_bytes = request.size_bytes,
                    "File selected"
                );
                attempt.selected = Some(SelectedFile {
                    request: request.clone(),
                    data,
                });
                self.publish(UploadState::Idle);
                Ok(request)
            }
            Err(e) => {
                tracing::debug!(file_name = %request.file_name, error = %e, "File rejected");
                attempt.selected = None;
                self.publish(UploadState::Error {
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Run credentials, transfer and notification for the selected file.
    ///
    /// `on_progress` sees every progress value published as
    /// `Uploading(progress)`.
    pub async fn start_upload<F>(&self, mut on_progress: F) -> Result<UploadOutcome, UploadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let (request, data) = {
            let mut attempt = self.attempt.lock().await;
            let state = self.state();
            if state.is_uploading() {
                return Err(UploadError::ConcurrentUpload);
            }
            if attempt.started {
                return Err(UploadError::InvalidState {
                    action: "start an upload",
                    state: state_name(&state).to_string(),
                });
            }
            let selected = attempt
                .selected
                .as_ref()
                .ok_or(UploadError::NoFileSelected)?;
            let request = selected.request.clone();
            let data = selected.data.clone();

            attempt.started = true;
            self.publish(UploadState::Uploading(TransferProgress::new(
                0,
                request.size_bytes,
            )));
            (request, data)
        };

        tracing::info!(
            file_name = %request.file_name,
            size_bytes = request.size_bytes,
            mode = ?self.transfer_mode,
            "Upload started"
        );

        let mut in_flight = InFlight {
            state: &self.state,
            settled: false,
        };
        let result = self.run_pipeline(&request, data, &mut on_progress).await;
        in_flight.settled = true;

        match result {
            Ok(outcome) => {
                {
                    let mut attempt = self.attempt.lock().await;
                    attempt.outcome = Some(outcome.clone());
                    self.publish(UploadState::Success {
                        file_key: outcome.file_key.clone(),
                        tracking_id: outcome.tracking_id.clone(),
                    });
                }
                tracing::info!(
                    file_key = %outcome.file_key,
                    tracking_id = %outcome.tracking_id,
                    "Upload completed"
                );
                if let Some(hook) = &self.on_complete {
                    hook(&outcome);
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(file_name = %request.file_name, error = %e, "Upload failed");
                self.publish(UploadState::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_pipeline<F>(
        &self,
        request: &UploadRequest,
        data: Bytes,
        on_progress: &mut F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let credentials = self
            .requester
            .request_credentials(&request.file_name, &request.mime_type, request.size_bytes)
            .await?;
        self.attempt.lock().await.credentials = Some(credentials.clone());

        let report = |progress: TransferProgress| {
            self.publish(UploadState::Uploading(progress));
            on_progress(progress);
        };

        let file_key = match self.transfer_mode {
            TransferMode::Direct => {
                self.transfer
                    .transfer(request, data, &credentials, report)
                    .await?
            }
            TransferMode::Relay => {
                self.transfer
                    .transfer_via_relay(self.requester.api_url(), request, data, &credentials, report)
                    .await?
            }
        };

        let receipt = self.notifier.notify(&file_key).await?;

        Ok(UploadOutcome {
            record: AnalysisRecord::new(
                receipt.tracking_id.clone(),
                request.file_name.clone(),
                file_key.clone(),
            ),
            file_key,
            tracking_id: receipt.tracking_id,
        })
    }

    /// Back to `Idle`, discarding the selection, credentials, outcome and any
    /// running status polls. Rejected while an upload is running.
    pub async fn reset(&self) -> Result<(), UploadError> {
        let mut attempt = self.attempt.lock().await;
        if self.state().is_uploading() {
            return Err(UploadError::InvalidState {
                action: "reset",
                state: "uploading".to_string(),
            });
        }
        attempt.timers.cancel();
        *attempt = Attempt::new(self.root.child_token());
        self.publish(UploadState::Idle);
        tracing::debug!("Upload attempt reset");
        Ok(())
    }

    /// Follow the analysis of the last successful upload. The poll is
    /// cancelled by `reset`, by dropping the handle, or with the orchestrator.
    pub async fn watch_analysis(
        &self,
        source: Arc<dyn StatusSource>,
    ) -> Result<PollHandle, UploadError> {
        let attempt = self.attempt.lock().await;
        let outcome = attempt
            .outcome
            .as_ref()
            .ok_or_else(|| UploadError::InvalidState {
                action: "watch the analysis",
                state: state_name(&self.state()).to_string(),
            })?;

        let poller = StatusPoller::new(source)
            .with_interval(self.poll_interval)
            .with_budget(self.poll_budget);
        Ok(poller.poll_with_token(outcome.record.clone(), attempt.timers.child_token()))
    }

    /// Status source matching the configuration: HTTP when `status_url` is
    /// set, simulated otherwise.
    pub fn status_source(&self) -> Arc<dyn StatusSource> {
        match &self.status_url {
            Some(url) => Arc::new(HttpStatusSource::new(self.client.clone(), url.clone())),
            None => Arc::new(SimulatedStatusSource::new()),
        }
    }
}

impl Drop for UploadOrchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl Default for UploadOrchestrator {
    fn default() -> Self {
        let root = CancellationToken::new();
        let (state, _) = watch::channel(UploadState::Idle);
        let client = Client::new();
        let config = ClientConfig::default();
        Self {
            validator: config.validator(),
            requester: CredentialRequester::new(client.clone(), config.api_url.clone()),
            transfer: TransferAgent::default(),
            transfer_mode: config.transfer_mode,
            notifier: Arc::new(SimulatedNotifier::new(config.notify_delay)),
            client,
            status_url: None,
            poll_interval: POLL_INTERVAL,
            poll_budget: POLL_BUDGET,
            state,
            attempt: Mutex::new(Attempt::new(root.child_token())),
            root,
            on_complete: None,
        }
    }
}

/// Marks the attempt failed if the upload future is dropped before it settles.
struct InFlight<'a> {
    state: &'a watch::Sender<UploadState>,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.send_replace(UploadState::Error {
                message: "Upload cancelled".to_string(),
            });
        }
    }
}

fn state_name(state: &UploadState) -> &'static str {
    match state {
        UploadState::Idle => "idle",
        UploadState::Uploading(_) => "uploading",
        UploadState::Success { .. } => "success",
        UploadState::Error { .. } => "error",
    }
}
