pub mod health;
pub mod presigned_url;
pub mod upload_proxy;
