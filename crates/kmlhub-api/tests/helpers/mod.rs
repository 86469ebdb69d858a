//! Shared setup for proxy service integration tests.

#![allow(dead_code)]

use axum_test::TestServer;
use kmlhub_api::setup::routes;
use kmlhub_api::AppState;
use kmlhub_core::{BaseConfig, Config, ProxyConfig};
use std::sync::Arc;

/// Test application: the router served in-process.
pub struct TestApp {
    pub server: TestServer,
}

impl TestApp {
    /// Get the HTTP test client
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

/// Build a test config pointing the credential issuer at `upstream_presign_url`.
pub fn create_test_config(upstream_presign_url: &str) -> ProxyConfig {
    ProxyConfig {
        base: BaseConfig {
            server_port: 3000,
            cors_origins: vec!["*".to_string()],
            environment: "test".to_string(),
        },
        upstream_presign_url: upstream_presign_url.to_string(),
        upstream_timeout_secs: 5,
        presign_fallback_enabled: false,
        fallback_store_url: None,
        max_file_size_bytes: 50 * 1024 * 1024,
        allowed_extensions: vec!["kml".to_string(), "kmz".to_string()],
        relay_timeout_secs: 5,
    }
}

/// Setup a test application with the default test config
pub async fn setup_test_app(upstream_presign_url: &str) -> TestApp {
    setup_test_app_with(create_test_config(upstream_presign_url)).await
}

/// Setup a test application from an explicit config
pub async fn setup_test_app_with(proxy_config: ProxyConfig) -> TestApp {
    let config = Config(Box::new(proxy_config));
    config.validate().expect("Test config should be valid");

    let state = Arc::new(AppState::new(config.clone()).expect("Failed to build app state"));
    let app = routes::setup_routes(&config, state).expect("Failed to setup routes");
    let server = TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp { server }
}

/// A small but well-formed KML document.
pub fn sample_kml() -> Vec<u8> {
    br#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Placemark><name>Parcel</name><Point><coordinates>-122.08,37.42,0</coordinates></Point></Placemark>
</kml>"#
        .to_vec()
}
