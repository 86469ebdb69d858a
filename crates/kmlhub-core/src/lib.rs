//! KML Hub Core Library
//!
//! This crate provides the domain models, error types, configuration, file
//! validation and storage key helpers shared by the upload client, the proxy
//! service and the CLI.

pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{BaseConfig, ClientConfig, Config, ProxyConfig, TransferMode};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use validation::{FileValidator, ValidationError};
