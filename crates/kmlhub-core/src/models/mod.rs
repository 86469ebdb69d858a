//! Data models for the upload pipeline
//!
//! `upload` holds the client-side pipeline types, `analysis` the records the
//! status poller produces, and `presigned_upload` the JSON bodies exchanged
//! with the proxy service.

mod analysis;
pub mod presigned_upload;
mod upload;

pub use analysis::*;
pub use presigned_upload::*;
pub use upload::*;
