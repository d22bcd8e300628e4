//! Page fetching for scrape passes.
//!
//! Two fetch modes: a rate-limited plain GET with a randomized client
//! identity, and a headless-browser render for stores whose pages are
//! assembled by JavaScript. Render timeouts get an exponential backoff
//! retry budget; everything else fails fast.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Client identity strings rotated per request to reduce trivial blocking.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux ppc64le; rv:75.0) Gecko/20100101 Firefox/75.0",
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:39.0) Gecko/20100101 Firefox/75.0",
    "Mozilla/5.0 (Macintosh; U; Intel Mac OS X 10.10; rv:75.0) Gecko/20100101 Firefox/75.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_3) AppleWebKit/537.75.14 \
     (KHTML, like Gecko) Version/7.0.3 Safari/7046A194A",
    "Opera/9.80 (X11; Linux i686; Ubuntu/14.10) Presto/2.12.388 Version/12.16",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/70.0.3538.77 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/55.0.2919.83 Safari/537.36",
    "Mozilla/5.0 (Linux; U; Android 4.0.3; ko-kr; LG-L160L Build/IML74K) \
     AppleWebkit/534.30 (KHTML, like Gecko) Version/4.0 Mobile Safari/534.30",
];

/// Why a fetch failed. Connection errors, timeouts of plain GETs and
/// non-success statuses all collapse into [`FetchError::UrlNotFound`];
/// only exhausted browser renders are reported separately.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page not found: {url} ({reason})")]
    UrlNotFound { url: String, reason: String },
    #[error("browser render timed out for {url} after {attempts} attempts")]
    RenderTimeout { url: String, attempts: u32 },
}

/// Fetcher tuning knobs.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub render_timeout_seconds: u64,
    pub render_attempts: u32,
    pub render_backoff_base_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_requests_per_second: 4,
            render_timeout_seconds: 45,
            render_attempts: 3,
            render_backoff_base_ms: 500,
        }
    }
}

/// Rate-limited page fetcher shared by one batch invocation.
pub struct PageFetcher {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: FetcherConfig,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .cookie_store(true)
            .build()
            .context("failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("request rate must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            config,
        })
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
    }

    /// Fetch the raw text of `url`, rendering it in a headless browser
    /// when `render_with_browser` is set.
    pub async fn fetch(&self, url: &str, render_with_browser: bool) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;
        if render_with_browser {
            self.fetch_rendered(url).await
        } else {
            self.fetch_simple(url, true).await
        }
    }

    /// Single GET. Site maps are fetched through this path without the
    /// randomized user agent.
    pub(crate) async fn fetch_simple(
        &self,
        url: &str,
        use_random_user_agent: bool,
    ) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if use_random_user_agent {
            request = request.header(USER_AGENT, Self::random_user_agent());
        }

        let response = request.send().await.map_err(|e| FetchError::UrlNotFound {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(FetchError::UrlNotFound {
                url: url.to_string(),
                reason: format!("response status was {}", response.status()),
            });
        }

        response.text().await.map_err(|e| FetchError::UrlNotFound {
            url: url.to_string(),
            reason: format!("failed to read response body: {e}"),
        })
    }

    /// Rendered fetch with an exponential backoff budget for timeouts.
    async fn fetch_rendered(&self, url: &str) -> Result<String, FetchError> {
        let timeout = Duration::from_secs(self.config.render_timeout_seconds);

        for attempt in 0..self.config.render_attempts {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(self.config.render_backoff_base_ms * (1u64 << attempt));
                debug!(url, attempt, ?backoff, "retrying browser render");
                sleep(backoff).await;
            }

            match tokio::time::timeout(timeout, self.render_once(url)).await {
                Ok(Ok(html)) => return Ok(html),
                Ok(Err(e)) => {
                    return Err(FetchError::UrlNotFound {
                        url: url.to_string(),
                        reason: format!("browser navigation failed: {e:#}"),
                    })
                }
                Err(_) => warn!(url, attempt, "browser render timed out"),
            }
        }

        Err(FetchError::RenderTimeout {
            url: url.to_string(),
            attempts: self.config.render_attempts,
        })
    }

    /// One isolated browser context: launch, navigate, capture the
    /// rendered DOM, tear down.
    async fn render_once(&self, url: &str) -> Result<String> {
        let browser_config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", Self::random_user_agent()))
            .build()
            .map_err(|e| anyhow::anyhow!("browser config error: {e}"))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch headless browser")?;
        let events = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let content = async {
            let page = browser
                .new_page(url)
                .await
                .context("failed to open page")?;
            page.wait_for_navigation().await.ok();
            let html = page.content().await.context("failed to capture rendered DOM")?;
            page.close().await.ok();
            Ok::<_, anyhow::Error>(html)
        }
        .await;

        browser.close().await.ok();
        events.abort();
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_is_nonempty_and_stable() {
        for _ in 0..32 {
            let agent = PageFetcher::random_user_agent();
            assert!(USER_AGENTS.contains(&agent));
        }
    }

    #[tokio::test]
    async fn zero_request_rate_is_rejected() {
        let config = FetcherConfig {
            max_requests_per_second: 0,
            ..FetcherConfig::default()
        };
        assert!(PageFetcher::new(config).is_err());
    }
}
