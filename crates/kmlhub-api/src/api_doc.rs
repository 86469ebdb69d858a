//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use kmlhub_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "KML Hub API",
        version = "0.1.0",
        description = "Issues presigned upload URLs for KML/KMZ files and relays uploads to object storage."
    ),
    paths(
        handlers::presigned_url::create_presigned_url,
        handlers::upload_proxy::upload_proxy,
        handlers::health::health_check,
    ),
    components(schemas(
        models::PresignedUrlRequest,
        models::PresignedUrlResponse,
        models::UploadProxyResponse,
        handlers::health::HealthResponse,
        error::ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Upload credentials and relay"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
