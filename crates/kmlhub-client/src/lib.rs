//! Client-side upload pipeline for KML/KMZ files.
//!
//! The stages run in this order, each usable on its own:
//!
//! 1. [`kmlhub_core::validation`] checks size and extension locally.
//! 2. [`CredentialRequester`] asks the proxy for a presigned upload URL.
//! 3. [`TransferAgent`] streams the bytes to the store, reporting progress.
//! 4. [`ProcessingNotifier`] hands the stored file to the processing backend.
//! 5. [`StatusPoller`] follows the analysis until it finishes.
//!
//! [`UploadOrchestrator`] sequences stages 1 to 4, owns the visible
//! [`UploadState`](kmlhub_core::models::UploadState) and starts stage 5 on
//! request.

pub mod credentials;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod poller;
pub mod transfer;

pub use credentials::CredentialRequester;
pub use error::{CredentialError, NotifyError, StatusError, TransferError, UploadError};
pub use notifier::{HttpNotifier, NotifyReceipt, ProcessingNotifier, SimulatedNotifier};
pub use orchestrator::{UploadOrchestrator, UploadOutcome};
pub use poller::{HttpStatusSource, PollHandle, SimulatedStatusSource, StatusPoller, StatusSource};
pub use transfer::TransferAgent;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

/// Timeout applied to the short JSON calls (credentials, notify, status).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by the pipeline stages.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Read the `error` field of a JSON error body, falling back to the raw text.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text)
}
