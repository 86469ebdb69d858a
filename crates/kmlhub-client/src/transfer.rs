//! Transfer agent
//!
//! Streams file bytes to the object store, either directly with a PUT to the
//! presigned URL or through the proxy's `/api/upload-proxy` relay.
//!
//! Progress is counted as the transport pulls body chunks. Those counts are
//! sent over a channel and the progress callback runs on the caller's task,
//! never on the transport's. Reported percentages stay below 100 until the
//! store has answered with a 2xx.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use tokio::sync::mpsc;

use kmlhub_core::keys::{file_key_from_url, synthesized_file_key};
use kmlhub_core::models::{TransferProgress, UploadCredentials, UploadProxyResponse, UploadRequest};
use kmlhub_core::validation::mime_type_for;

use crate::error::TransferError;
use crate::error_message;

/// Fixed upload timeout.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

pub const UPLOAD_PROXY_PATH: &str = "/api/upload-proxy";

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct TransferAgent {
    client: Client,
    timeout: Duration,
}

impl Default for TransferAgent {
    fn default() -> Self {
        Self::new(Client::new(), TRANSFER_TIMEOUT)
    }
}

impl TransferAgent {
    /// `client` should not carry its own timeout; the agent enforces `timeout`
    /// over the whole exchange.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// PUT the bytes to `credentials.transfer_url` and return the stored key.
    #[tracing::instrument(
        skip(self, data, credentials, on_progress),
        fields(file_name = %request.file_name, bytes = data.len())
    )]
    pub async fn transfer<F>(
        &self,
        request: &UploadRequest,
        data: Bytes,
        credentials: &UploadCredentials,
        on_progress: F,
    ) -> Result<String, TransferError>
    where
        F: FnMut(TransferProgress),
    {
        let total = data.len() as u64;
        let (body, progress_rx) = progress_body(data);

        let builder = self
            .client
            .put(&credentials.transfer_url)
            .header(CONTENT_TYPE, content_type(request))
            .header(CONTENT_LENGTH, total)
            .body(body);

        self.drive(builder, total, progress_rx, on_progress).await?;

        let file_key = file_key_from_url(&credentials.transfer_url).unwrap_or_else(|| {
            synthesized_file_key(&request.file_name, Utc::now().timestamp_millis())
        });

        tracing::info!(file_key = %file_key, "File transferred to storage");
        Ok(file_key)
    }

    /// Send the bytes to the proxy relay, which performs the PUT itself.
    #[tracing::instrument(
        skip(self, data, credentials, on_progress),
        fields(file_name = %request.file_name, bytes = data.len())
    )]
    pub async fn transfer_via_relay<F>(
        &self,
        api_url: &str,
        request: &UploadRequest,
        data: Bytes,
        credentials: &UploadCredentials,
        on_progress: F,
    ) -> Result<String, TransferError>
    where
        F: FnMut(TransferProgress),
    {
        let total = data.len() as u64;
        let (body, progress_rx) = progress_body(data);

        let part = Part::stream_with_length(body, total)
            .file_name(request.file_name.clone())
            .mime_str(content_type(request))
            .map_err(TransferError::Network)?;
        let form = Form::new()
            .text("presignedUrl", credentials.transfer_url.clone())
            .part("file", part);

        let url = format!("{}{}", api_url.trim_end_matches('/'), UPLOAD_PROXY_PATH);
        let builder = self.client.post(&url).multipart(form);

        let body = self.drive(builder, total, progress_rx, on_progress).await?;

        let file_key = serde_json::from_slice::<UploadProxyResponse>(&body)
            .ok()
            .map(|r| r.file_key)
            .filter(|k| !k.is_empty())
            .or_else(|| file_key_from_url(&credentials.transfer_url))
            .unwrap_or_else(|| {
                synthesized_file_key(&request.file_name, Utc::now().timestamp_millis())
            });

        tracing::info!(file_key = %file_key, "File relayed to storage");
        Ok(file_key)
    }

    /// Run the whole exchange under the timeout, forwarding progress as it
    /// arrives, and return the response body. The deadline covers the body
    /// read too, so a peer that stalls after its headers still times out.
    async fn drive<F>(
        &self,
        builder: RequestBuilder,
        total: u64,
        mut progress_rx: mpsc::UnboundedReceiver<u64>,
        mut on_progress: F,
    ) -> Result<Bytes, TransferError>
    where
        F: FnMut(TransferProgress),
    {
        let mut last_sent: Option<u64> = None;
        let mut report = |sent: u64| {
            if last_sent.is_some_and(|last| sent <= last) {
                return;
            }
            last_sent = Some(sent);
            on_progress(TransferProgress::new(sent, total).pending_ack());
        };

        report(0);

        let send = builder.send();
        tokio::pin!(send);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => return Err(self.timed_out()),
                result = &mut send => break result,
                Some(sent) = progress_rx.recv() => report(sent),
            }
        };

        let response = result.map_err(|e| self.classify(e))?;

        while let Ok(sent) = progress_rx.try_recv() {
            report(sent);
        }

        let status = response.status();
        if !status.is_success() {
            let message = tokio::select! {
                biased;
                _ = &mut deadline => return Err(self.timed_out()),
                message = error_message(response) => message,
            };
            tracing::warn!(status_code = status.as_u16(), error = %message, "Storage rejected upload");
            return Err(TransferError::UpstreamError {
                status_code: status.as_u16(),
                message,
            });
        }

        let body = tokio::select! {
            biased;
            _ = &mut deadline => return Err(self.timed_out()),
            body = response.bytes() => body.map_err(|e| self.classify(e))?,
        };

        on_progress(TransferProgress::complete(total));
        Ok(body)
    }

    fn timed_out(&self) -> TransferError {
        tracing::warn!(timeout_secs = self.timeout.as_secs(), "Upload timed out");
        TransferError::Timeout(self.timeout)
    }

    fn classify(&self, e: reqwest::Error) -> TransferError {
        if e.is_timeout() {
            TransferError::Timeout(self.timeout)
        } else {
            TransferError::Network(e)
        }
    }
}

fn content_type(request: &UploadRequest) -> &str {
    if request.mime_type.trim().is_empty() {
        mime_type_for(&request.file_name)
    } else {
        &request.mime_type
    }
}

/// Wrap the bytes in a streaming body that reports the running byte count.
fn progress_body(data: Bytes) -> (Body, mpsc::UnboundedReceiver<u64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let chunk_stream = stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        // The receiver is gone once the transfer has been abandoned.
        let _ = tx.send(sent);
        Ok::<Bytes, std::io::Error>(chunk)
    }));

    (Body::wrap_stream(chunk_stream), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_falls_back_to_extension() {
        let request = UploadRequest::new("parcel.kmz", "", 10);
        assert_eq!(content_type(&request), "application/vnd.google-earth.kmz");

        let request = UploadRequest::new("parcel.kml", "text/xml", 10);
        assert_eq!(content_type(&request), "text/xml");
    }
}
