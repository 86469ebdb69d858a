//! Application setup and initialization
//!
//! Everything `main` needs to go from a loaded [`Config`] to a running
//! router, kept here so integration tests can build the same router.

pub mod routes;
pub mod server;

use crate::state::AppState;
use anyhow::{Context, Result};
use kmlhub_core::Config;
use std::sync::Arc;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    // Validate configuration first - fail fast on misconfiguration
    config
        .validate()
        .context("Configuration validation failed")?;

    crate::telemetry::init_telemetry()
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment(),
        upstream = %config.upstream_presign_url(),
        fallback_enabled = config.presign_fallback_enabled(),
        "Configuration loaded and validated successfully"
    );

    let state = Arc::new(AppState::new(config.clone())?);
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
