//! Page rendering transports.
//!
//! [`BrowserlessRenderer`] asks a remote headless browser for the fully
//! rendered DOM and is the primary transport. [`HttpRenderer`] is a plain GET
//! with a desktop browser User-Agent, used as the fallback for sources whose
//! scraper asks for it.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::FetchError;

/// Desktop Chrome UA; several sources serve a stripped page to unknown agents.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Milliseconds the browser waits after network idle before serialising the DOM.
const SETTLE_WAIT_MS: u64 = 2000;

/// Markers of bot-challenge interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "Just a moment...",
    "cf-chl-",
    "challenge-platform",
    "Attention Required! | Cloudflare",
    "captcha-delivery",
];

/// Turns a URL into rendered HTML.
#[async_trait]
pub trait RenderPage: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    async fn render(&self, url: &str) -> Result<String, FetchError>;
}

/// Browserless `/content` client.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    navigation_timeout: Duration,
}

impl BrowserlessRenderer {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        navigation_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // The HTTP call outlives the navigation by the settle wait plus slack.
        let client = reqwest::Client::builder()
            .timeout(navigation_timeout + Duration::from_millis(SETTLE_WAIT_MS) + Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            navigation_timeout,
        })
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={}", urlencoding::encode(token)));
        }
        endpoint
    }
}

#[async_trait]
impl RenderPage for BrowserlessRenderer {
    fn name(&self) -> &'static str {
        "browserless"
    }

    #[instrument(level = "debug", skip(self), fields(transport = "browserless"))]
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": self.navigation_timeout.as_millis() as u64,
            },
            "waitForTimeout": SETTLE_WAIT_MS,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = resp.status();
        let html = resp.text().await.map_err(|e| transport_error(url, e))?;
        debug!(
            %status,
            bytes = html.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Browserless responded"
        );
        check_response(url, status, html)
    }
}

/// Direct HTTP GET transport.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RenderPage for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(level = "debug", skip(self), fields(transport = "http"))]
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = resp.status();
        let html = resp.text().await.map_err(|e| transport_error(url, e))?;
        check_response(url, status, html)
    }
}

/// Primary transport plus the fallback offered to sources that ask for one.
///
/// Without a Browserless endpoint plain HTTP is the primary and there is no
/// fallback.
pub fn renderer_chain(
    browserless_url: Option<&str>,
    token: Option<&str>,
    navigation_timeout: Duration,
) -> Result<(Arc<dyn RenderPage>, Option<Arc<dyn RenderPage>>), reqwest::Error> {
    let http: Arc<dyn RenderPage> = Arc::new(HttpRenderer::new(navigation_timeout)?);
    match browserless_url {
        Some(base) => {
            let browser: Arc<dyn RenderPage> =
                Arc::new(BrowserlessRenderer::new(base, token, navigation_timeout)?);
            Ok((browser, Some(http)))
        }
        None => {
            warn!("BROWSERLESS_URL not set; rendering with plain HTTP only, no fallback");
            Ok((http, None))
        }
    }
}

/// Map a reqwest failure onto the fetch taxonomy.
pub fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        warn!(%url, "Render timed out");
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }
    FetchError::Blocked {
        url: url.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

/// Classify a completed response: non-2xx statuses and challenge pages fail.
pub fn check_response(url: &str, status: StatusCode, html: String) -> Result<String, FetchError> {
    match status.as_u16() {
        200..=299 => {}
        408 | 504 => {
            return Err(FetchError::Timeout {
                url: url.to_string(),
            });
        }
        code => {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                status: Some(code),
                message: crate::utils::truncate_for_log(html.trim(), 200),
            });
        }
    }

    if looks_like_challenge(&html) {
        return Err(FetchError::Blocked {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: "bot challenge page".to_string(),
        });
    }
    if html.trim().is_empty() {
        return Err(FetchError::Empty {
            url: url.to_string(),
            message: "empty response body".to_string(),
        });
    }
    Ok(html)
}

pub fn looks_like_challenge(html: &str) -> bool {
    // Challenge pages are small; real articles mentioning these strings are not.
    html.len() < 50_000 && CHALLENGE_MARKERS.iter().any(|m| html.contains(m))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Renderer serving canned responses and counting calls per URL.
    #[derive(Default)]
    pub struct FakeRenderer {
        pub pages: HashMap<String, Result<String, FetchError>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRenderer {
        pub fn with(mut self, url: &str, page: Result<String, FetchError>) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RenderPage for FakeRenderer {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn render(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().unwrap_or_else(|| {
                Err(FetchError::Blocked {
                    url: url.to_string(),
                    status: Some(404),
                    message: "not found".into(),
                })
            })
        }
    }
}
