//! Container registry access

pub mod client;
pub mod limiter;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while listing tags
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid registry URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Registry returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Registry authentication failed: {0}")]
    Auth(String),

    #[error("Registry error: {0}")]
    Other(String),
}

/// Source of the tags published for an image
#[async_trait]
pub trait TagSource: Send + Sync {
    /// List every tag of `image` on `registry`
    async fn list_tags(&self, registry: &str, image: &str) -> Result<Vec<String>, RegistryError>;
}
