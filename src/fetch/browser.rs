//! Headless-browser fetcher.
//!
//! Launches a fresh Chromium per fetch, navigates to the certificate page,
//! and waits until at least one content image carries a real https src and
//! the DOM has stopped changing. Cert pages hydrate their image slots with
//! base64 placeholders first, so returning too early yields no usable media.

use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use regex::Regex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{Fetch, FetchError};
use crate::model::CertId;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Consecutive identical snapshots before the DOM counts as stable.
const STABLE_SNAPSHOTS: u32 = 2;

pub struct BrowserFetcher {
    page_base: String,
    timeout: Duration,
    live_image: Regex,
}

impl BrowserFetcher {
    pub fn new(page_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            page_base: page_base.into(),
            timeout,
            live_image: Regex::new(r#"itemprop="contentUrl"[^>]*src="https?://"#)
                .expect("static regex"),
        }
    }

    fn page_url(&self, id: CertId) -> String {
        format!("{}/{id}/psa", self.page_base)
    }

    async fn launch(&self) -> Result<(Browser, tokio::task::JoinHandle<()>), FetchError> {
        let config = BrowserConfig::builder()
            .new_headless_mode()
            .window_size(1920, 1080)
            .args(vec![
                "--disable-blink-features=AutomationControlled",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-extensions",
                "--disable-software-rasterizer",
            ])
            .build()
            .map_err(FetchError::Network)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        // Drain browser events in the background for the lifetime of this fetch.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, events))
    }

    /// Poll the rendered DOM until the content images are live and the page
    /// has settled, then hand back the full HTML.
    async fn render(&self, page: &Page, id: CertId) -> Result<String, FetchError> {
        let deadline = Instant::now() + self.timeout;
        let mut last = String::new();
        let mut stable = 0;

        loop {
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout);
            }

            let html = page
                .content()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            if looks_challenged(&html) {
                return Err(FetchError::Challenge);
            }

            if self.live_image.is_match(&html) {
                if html == last {
                    stable += 1;
                    if stable >= STABLE_SNAPSHOTS {
                        debug!(cert = %id, bytes = html.len(), "page settled");
                        return Ok(html);
                    }
                } else {
                    stable = 0;
                    last = html;
                }
            }

            sleep(POLL_INTERVAL).await;
        }
    }
}

impl Fetch for BrowserFetcher {
    async fn fetch(&self, id: CertId) -> Result<String, FetchError> {
        let url = self.page_url(id);
        debug!(cert = %id, %url, "fetching");

        let (browser, events) = self.launch().await?;

        let result = match browser.new_page(url.as_str()).await {
            Ok(page) => self.render(&page, id).await,
            Err(e) => Err(FetchError::Network(e.to_string())),
        };

        let mut browser = browser;
        if let Err(e) = browser.close().await {
            warn!(cert = %id, "browser close failed: {e}");
        }
        let _ = browser.wait().await;
        events.abort();

        result
    }
}

fn looks_challenged(html: &str) -> bool {
    let lower = html.to_lowercase();
    ["captcha", "verify you are human", "access denied"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_image_regex_rejects_placeholders() {
        let fetcher = BrowserFetcher::new("https://example.com/cert", Duration::from_secs(1));
        assert!(
            fetcher
                .live_image
                .is_match(r#"<img itemprop="contentUrl" src="https://img.example/1.jpg">"#)
        );
        assert!(
            !fetcher
                .live_image
                .is_match(r#"<img itemprop="contentUrl" src="data:image/gif;base64,R0l">"#)
        );
    }

    #[test]
    fn challenge_markers_detected() {
        assert!(looks_challenged("<html>Please solve this CAPTCHA</html>"));
        assert!(!looks_challenged("<html>#12345678</html>"));
    }

    #[test]
    fn page_url_layout() {
        let fetcher = BrowserFetcher::new("https://example.com/cert", Duration::from_secs(1));
        assert_eq!(
            fetcher.page_url(CertId(100000001)),
            "https://example.com/cert/100000001/psa"
        );
    }
}
