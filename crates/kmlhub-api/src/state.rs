//! Shared application state.

use anyhow::{Context, Result};
use kmlhub_core::Config;
use reqwest::Client;

pub struct AppState {
    pub config: Config,
    /// Client for the credential issuer and the object store. Carries the
    /// upstream timeout; relay PUTs override it per request.
    pub http_client: Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.upstream_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }
}
