//! Configuration module
//!
//! Environment-driven configuration for the proxy service ([`Config`]) and
//! for the client-side upload pipeline ([`ClientConfig`]). A `.env` file is
//! loaded first when present.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::validation::{FileValidator, KML_EXTENSIONS};

// Common constants
const SERVER_PORT: u16 = 3000;
const MAX_FILE_SIZE_MB: u64 = 50;
const UPSTREAM_TIMEOUT_SECS: u64 = 10;
const RELAY_TIMEOUT_SECS: u64 = 30;
const TRANSFER_TIMEOUT_SECS: u64 = 30;
const NOTIFY_DELAY_MS: u64 = 2000;
const POLL_INTERVAL_MS: u64 = 2000;
const POLL_BUDGET_SECS: u64 = 30;
const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Reads a variable by name. `from_env` uses the process environment; tests
/// pass a map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_or<T: std::str::FromStr>(lookup: Lookup<'_>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: Lookup<'_>, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| v.trim().to_lowercase())
        .and_then(|v| match v.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn non_empty(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(lookup: Lookup<'_>, key: &str, default: &[&str]) -> Vec<String> {
    match non_empty(lookup, key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Settings shared by every service binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
}

/// Proxy service configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub base: BaseConfig,
    /// External function that issues presigned upload URLs
    pub upstream_presign_url: String,
    pub upstream_timeout_secs: u64,
    /// Synthesize mock credentials when the issuer omits the presigned URL
    pub presign_fallback_enabled: bool,
    /// Base URL used to build fallback credentials
    pub fallback_store_url: Option<String>,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub relay_timeout_secs: u64,
}

/// Application configuration (proxy service).
#[derive(Clone, Debug)]
pub struct Config(pub Box<ProxyConfig>);

impl Config {
    fn as_proxy(&self) -> &ProxyConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_environment(&self.as_proxy().base.environment)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = ProxyConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_proxy().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_proxy().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_proxy().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_proxy().base.environment
    }

    pub fn upstream_presign_url(&self) -> &str {
        &self.as_proxy().upstream_presign_url
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.as_proxy().upstream_timeout_secs)
    }

    pub fn presign_fallback_enabled(&self) -> bool {
        self.as_proxy().presign_fallback_enabled
    }

    pub fn fallback_store_url(&self) -> Option<&str> {
        self.as_proxy().fallback_store_url.as_deref()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.as_proxy().max_file_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.as_proxy().allowed_extensions
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.as_proxy().relay_timeout_secs)
    }

    pub fn validator(&self) -> FileValidator {
        FileValidator::new(self.max_file_size_bytes(), self.allowed_extensions().to_vec())
    }
}

pub fn is_production_environment(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&process_env)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        Self::from_lookup(&|key: &str| vars.get(key).cloned())
    }

    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, anyhow::Error> {
        let environment = non_empty(lookup, "ENVIRONMENT")
            .or_else(|| non_empty(lookup, "APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let cors_origins = non_empty(lookup, "CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let server_port = match non_empty(lookup, "PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            None => SERVER_PORT,
        };

        let upstream_presign_url = non_empty(lookup, "UPSTREAM_PRESIGN_URL")
            .ok_or_else(|| anyhow::anyhow!("UPSTREAM_PRESIGN_URL must be set"))?;

        let config = ProxyConfig {
            base: BaseConfig {
                server_port,
                cors_origins,
                environment,
            },
            upstream_presign_url,
            upstream_timeout_secs: parse_or(lookup, "UPSTREAM_TIMEOUT_SECS", UPSTREAM_TIMEOUT_SECS),
            presign_fallback_enabled: parse_bool(lookup, "PRESIGN_FALLBACK_ENABLED", false),
            fallback_store_url: non_empty(lookup, "FALLBACK_STORE_URL"),
            max_file_size_bytes: parse_or(lookup, "MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB)
                * 1024
                * 1024,
            allowed_extensions: parse_list(lookup, "ALLOWED_EXTENSIONS", &KML_EXTENSIONS),
            relay_timeout_secs: parse_or(lookup, "RELAY_TIMEOUT_SECS", RELAY_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if is_production_environment(&self.base.environment)
            && self.base.cors_origins.iter().any(|o| o == "*")
        {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if !self.upstream_presign_url.starts_with("http://")
            && !self.upstream_presign_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "UPSTREAM_PRESIGN_URL must be an http(s) URL"
            ));
        }

        if self.presign_fallback_enabled && self.fallback_store_url.is_none() {
            return Err(anyhow::anyhow!(
                "PRESIGN_FALLBACK_ENABLED=true requires FALLBACK_STORE_URL to be set"
            ));
        }

        if self.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }

        if self.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }

        if self.upstream_timeout_secs == 0 || self.relay_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "UPSTREAM_TIMEOUT_SECS and RELAY_TIMEOUT_SECS must be greater than 0"
            ));
        }

        Ok(())
    }
}

/// How the transfer agent moves bytes to the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// PUT straight to the presigned URL
    Direct,
    /// Hand the bytes to the proxy's relay route
    Relay,
}

impl std::str::FromStr for TransferMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(TransferMode::Direct),
            "relay" => Ok(TransferMode::Relay),
            other => Err(anyhow::anyhow!(
                "Invalid TRANSFER_MODE: {}. Must be 'direct' or 'relay'",
                other
            )),
        }
    }
}

/// Client-side upload pipeline configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the proxy service
    pub api_url: String,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub transfer_timeout: Duration,
    pub transfer_mode: TransferMode,
    /// Delay used by the simulated notifier
    pub notify_delay: Duration,
    /// Real processing trigger; the simulated notifier is used when unset
    pub processing_trigger_url: Option<String>,
    /// Real status endpoint; the simulated status source is used when unset
    pub status_url: Option<String>,
    pub poll_interval: Duration,
    pub poll_budget: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_extensions: KML_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            transfer_timeout: Duration::from_secs(TRANSFER_TIMEOUT_SECS),
            transfer_mode: TransferMode::Direct,
            notify_delay: Duration::from_millis(NOTIFY_DELAY_MS),
            processing_trigger_url: None,
            status_url: None,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            poll_budget: Duration::from_secs(POLL_BUDGET_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&process_env)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        Self::from_lookup(&|key: &str| vars.get(key).cloned())
    }

    fn from_lookup(lookup: Lookup<'_>) -> Result<Self, anyhow::Error> {
        let transfer_mode = match non_empty(lookup, "TRANSFER_MODE") {
            Some(mode) => mode.parse()?,
            None => TransferMode::Direct,
        };

        let config = ClientConfig {
            api_url: non_empty(lookup, "KMLHUB_API_URL")
                .or_else(|| non_empty(lookup, "API_URL"))
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_file_size_bytes: parse_or(lookup, "MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB)
                * 1024
                * 1024,
            allowed_extensions: parse_list(lookup, "ALLOWED_EXTENSIONS", &KML_EXTENSIONS),
            transfer_timeout: Duration::from_secs(parse_or(
                lookup,
                "TRANSFER_TIMEOUT_SECS",
                TRANSFER_TIMEOUT_SECS,
            )),
            transfer_mode,
            notify_delay: Duration::from_millis(parse_or(
                lookup,
                "NOTIFY_DELAY_MS",
                NOTIFY_DELAY_MS,
            )),
            processing_trigger_url: non_empty(lookup, "PROCESSING_TRIGGER_URL"),
            status_url: non_empty(lookup, "STATUS_URL"),
            poll_interval: Duration::from_millis(parse_or(
                lookup,
                "POLL_INTERVAL_MS",
                POLL_INTERVAL_MS,
            )),
            poll_budget: Duration::from_secs(parse_or(lookup, "POLL_BUDGET_SECS", POLL_BUDGET_SECS)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(anyhow::anyhow!("KMLHUB_API_URL must be an http(s) URL"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow::anyhow!("POLL_INTERVAL_MS must be greater than 0"));
        }
        if self.transfer_timeout.is_zero() {
            return Err(anyhow::anyhow!(
                "TRANSFER_TIMEOUT_SECS must be greater than 0"
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }
        Ok(())
    }

    pub fn validator(&self) -> FileValidator {
        FileValidator::new(self.max_file_size_bytes, self.allowed_extensions.clone())
    }
}
