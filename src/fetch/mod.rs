//! Fetch collaborator: renders a certificate page and returns its HTML.
//!
//! The worker only depends on the [`Fetch`] seam; the shipped implementation
//! drives a headless Chromium via chromiumoxide.

pub mod browser;

pub use browser::BrowserFetcher;

use thiserror::Error;

use crate::model::CertId;

/// How a fetch attempt failed. The worker marks timeout/challenge stale and
/// network errors errored; a sustained run of either feeds the cooldown.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page load timed out")]
    Timeout,

    #[error("network: {0}")]
    Network(String),

    #[error("anti-automation challenge presented")]
    Challenge,
}

/// Returns rendered page content for an identifier, or fails.
pub trait Fetch {
    fn fetch(
        &self,
        id: CertId,
    ) -> impl Future<Output = std::result::Result<String, FetchError>> + Send;
}
