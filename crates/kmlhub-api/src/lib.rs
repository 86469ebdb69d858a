//! KML Hub API Library
//!
//! HTTP proxy in front of the credential issuer and the object store:
//! `POST /api/presigned-url` and `POST /api/upload-proxy`, plus health and
//! OpenAPI routes.

mod api_doc;
mod handlers;
mod telemetry;

pub mod error;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
