//! Content fetcher: rendered article pages to [`FetchedArticle`].
//!
//! Rendering goes through a [`RenderPage`] transport. When the caller asks for
//! it (the source's scraper sets `needs_fallback_fetch`), a failed primary
//! render is retried once through the fallback transport before giving up.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::browser::{DESKTOP_USER_AGENT, RenderPage, transport_error};
use crate::error::FetchError;
use crate::models::{FetchedArticle, HeroImage};

/// Smallest hero image accepted; anything below is a tracking pixel or placeholder.
pub const MIN_IMAGE_BYTES: usize = 1000;

/// Article bodies with less visible text than this are treated as empty.
pub const MIN_BODY_CHARS: usize = 200;

static OG_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article").unwrap());
static MAIN: Lazy<Selector> = Lazy::new(|| Selector::parse("main").unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static PUBLISHED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="article:published_time"]"#).unwrap());
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());
static JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());
static TWITTER_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="twitter:image"]"#).unwrap());

/// Loads listing pages for discovery.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn listing_html(&self, url: &str, use_fallback: bool) -> Result<String, FetchError>;
}

/// Loads article pages and hero images.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, use_fallback: bool) -> Result<FetchedArticle, FetchError>;

    async fn fetch_image(&self, url: &str) -> Result<HeroImage, FetchError>;
}

/// Production fetcher over a primary and optional fallback transport.
pub struct ArticleFetcher {
    primary: Arc<dyn RenderPage>,
    fallback: Option<Arc<dyn RenderPage>>,
    images: reqwest::Client,
    min_body_chars: usize,
}

impl ArticleFetcher {
    pub fn new(
        primary: Arc<dyn RenderPage>,
        fallback: Option<Arc<dyn RenderPage>>,
        image_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let images = reqwest::Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .timeout(image_timeout)
            .build()?;
        Ok(Self {
            primary,
            fallback,
            images,
            min_body_chars: MIN_BODY_CHARS,
        })
    }

    async fn render(&self, url: &str, use_fallback: bool) -> Result<String, FetchError> {
        match self.primary.render(url).await {
            Ok(html) => Ok(html),
            Err(e) => match (&self.fallback, use_fallback) {
                (Some(fallback), true) => {
                    warn!(
                        %url,
                        error = %e,
                        primary = self.primary.name(),
                        fallback = fallback.name(),
                        "Primary render failed, trying fallback"
                    );
                    fallback.render(url).await
                }
                _ => Err(e),
            },
        }
    }
}

#[async_trait]
impl PageSource for ArticleFetcher {
    async fn listing_html(&self, url: &str, use_fallback: bool) -> Result<String, FetchError> {
        self.render(url, use_fallback).await
    }
}

#[async_trait]
impl ContentFetcher for ArticleFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str, use_fallback: bool) -> Result<FetchedArticle, FetchError> {
        let html = self.render(url, use_fallback).await?;
        let article = parse_article(url, &html, self.min_body_chars)?;
        info!(title = %article.title, has_image = article.hero_image_ref.is_some(), "Fetched article");
        Ok(article)
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_image(&self, url: &str) -> Result<HeroImage, FetchError> {
        let resp = self
            .images
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: "image download failed".to_string(),
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = resp.bytes().await.map_err(|e| transport_error(url, e))?;

        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(FetchError::Empty {
                url: url.to_string(),
                message: format!("image too small ({} bytes)", bytes.len()),
            });
        }
        debug!(bytes = bytes.len(), ?content_type, "Downloaded hero image");
        Ok(HeroImage {
            bytes: bytes.to_vec(),
            content_type,
            original_url: url.to_string(),
        })
    }
}

/// Extract title, body, publication date and hero image from rendered HTML.
///
/// Fails with [`FetchError::Empty`] when there is no title or the body has
/// fewer than `min_body_chars` characters of visible text.
pub fn parse_article(url: &str, html: &str, min_body_chars: usize) -> Result<FetchedArticle, FetchError> {
    let doc = Html::parse_document(html);
    let base = Url::parse(url).ok();

    let title = meta_content(&doc, &OG_TITLE)
        .or_else(|| first_text(&doc, &H1))
        .or_else(|| first_text(&doc, &TITLE))
        .unwrap_or_default();
    if title.is_empty() {
        return Err(FetchError::Empty {
            url: url.to_string(),
            message: "no title".to_string(),
        });
    }

    let body = [&*ARTICLE, &*MAIN, &*BODY]
        .into_iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| el.inner_html())
        .unwrap_or_default();

    let article = FetchedArticle {
        url: url.to_string(),
        title,
        body,
        published_date: published_date(&doc),
        hero_image_ref: meta_content(&doc, &OG_IMAGE)
            .or_else(|| meta_content(&doc, &TWITTER_IMAGE))
            .and_then(|src| match &base {
                Some(b) => b.join(&src).ok().map(|u| u.to_string()),
                None => Some(src),
            }),
    };

    let text_len = article.text_excerpt(min_body_chars).chars().count();
    if text_len < min_body_chars {
        return Err(FetchError::Empty {
            url: url.to_string(),
            message: format!("body has {text_len} characters of text"),
        });
    }
    Ok(article)
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel).map(element_text).find(|t| !t.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn published_date(doc: &Html) -> Option<NaiveDate> {
    meta_content(doc, &PUBLISHED)
        .and_then(|s| parse_date_prefix(&s))
        .or_else(|| {
            doc.select(&TIME)
                .filter_map(|t| t.value().attr("datetime"))
                .find_map(parse_date_prefix)
        })
        .or_else(|| {
            doc.select(&JSON_LD).find_map(|script| {
                let raw = script.text().collect::<String>();
                let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
                find_string(&value, "datePublished").and_then(parse_date_prefix)
            })
        })
}

/// Parse the `YYYY-MM-DD` prefix of an ISO 8601 timestamp.
fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

/// Depth-first search for a string value under `key` (JSON-LD nests under `@graph`).
fn find_string<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    match value {
        serde_json::Value::Object(map) => map
            .get(key)
            .and_then(|v| v.as_str())
            .or_else(|| map.values().find_map(|v| find_string(v, key))),
        serde_json::Value::Array(items) => items.iter().find_map(|v| find_string(v, key)),
        _ => None,
    }
}
