//! Error types for certharvest.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Store or network unreachable. The worker loop pauses and retries the
    /// iteration rather than crashing the process.
    #[error("store connectivity: {0}")]
    Connectivity(#[from] sqlx::Error),

    #[error("fetch failed: {0}")]
    Fetch(#[from] crate::fetch::FetchError),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::model::Status,
        to: crate::model::Status,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("object storage: {0}")]
    Storage(#[from] object_store::Error),

    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
