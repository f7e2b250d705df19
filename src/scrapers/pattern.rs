//! Generic link-pattern scraper.
//!
//! Most publications only differ in which anchors on their listing page point
//! at articles. [`PatternScraper`] captures that as data: an anchor selector,
//! path patterns to include and exclude, and an optional minimum slug length.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::SourceScraper;
use crate::error::DiscoveryError;
use crate::models::SourceDescriptor;

/// Data-driven [`SourceScraper`].
///
/// Links are resolved against the listing page, restricted to the source's
/// own host and matched against the percent-decoded path.
pub struct PatternScraper {
    descriptor: SourceDescriptor,
    listing_pages: Vec<String>,
    anchors: Selector,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    min_slug_words: Option<usize>,
    fallback: bool,
    max_new: Option<usize>,
}

impl PatternScraper {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            listing_pages: vec![descriptor.homepage_url.clone()],
            descriptor,
            anchors: Selector::parse("a[href]").unwrap(),
            include: Vec::new(),
            exclude: Vec::new(),
            min_slug_words: None,
            fallback: false,
            max_new: None,
        }
    }

    /// Only consider anchors matching `css`. Patterns are compile-time constants.
    pub fn anchors(mut self, css: &str) -> Self {
        self.anchors = Selector::parse(css).unwrap();
        self
    }

    /// Accept paths matching `pattern`. Any include pattern may match.
    pub fn include(mut self, pattern: &str) -> Self {
        self.include.push(Regex::new(pattern).unwrap());
        self
    }

    /// Reject paths matching `pattern`, even when an include pattern matches.
    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(Regex::new(pattern).unwrap());
        self
    }

    /// Extra listing page scanned after the homepage.
    pub fn listing(mut self, url: &str) -> Self {
        self.listing_pages.push(url.to_string());
        self
    }

    /// Require the last path segment to have at least `words` hyphen-separated words.
    pub fn min_slug_words(mut self, words: usize) -> Self {
        self.min_slug_words = Some(words);
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    pub fn max_new(mut self, n: usize) -> Self {
        self.max_new = Some(n);
        self
    }

    fn same_site(&self, page: &Url, link: &Url) -> bool {
        fn bare(host: Option<&str>) -> Option<&str> {
            host.map(|h| h.strip_prefix("www.").unwrap_or(h))
        }
        matches!(link.scheme(), "http" | "https") && bare(page.host_str()) == bare(link.host_str())
    }

    fn path_matches(&self, path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if let Some(min) = self.min_slug_words {
            let slug = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            if slug.split('-').filter(|w| !w.is_empty()).count() < min {
                return false;
            }
        }
        true
    }
}

impl SourceScraper for PatternScraper {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn needs_fallback_fetch(&self) -> bool {
        self.fallback
    }

    fn max_new_articles(&self) -> Option<usize> {
        self.max_new
    }

    fn listing_pages(&self) -> Vec<String> {
        self.listing_pages.clone()
    }

    fn extract_links(&self, page_url: &Url, html: &str) -> Result<Vec<Url>, DiscoveryError> {
        let doc = Html::parse_document(html);
        let mut links = Vec::new();

        for a in doc.select(&self.anchors) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let Ok(mut link) = page_url.join(href) else {
                continue;
            };
            link.set_fragment(None);
            if !self.same_site(page_url, &link) {
                continue;
            }
            let path = urlencoding::decode(link.path())
                .map(|p| p.into_owned())
                .unwrap_or_else(|_| link.path().to_string());
            if self.path_matches(&path) {
                links.push(link);
            }
        }
        Ok(links)
    }
}
