//! Source scrapers: per-publication URL discovery.
//!
//! Every publication implements [`SourceScraper`]. A scraper only ever looks at
//! listing pages (homepage or category pages) and returns candidate article
//! URLs; loading the articles themselves is the content fetcher's job.
//!
//! # Supported Sources
//!
//! | Source | Region | Notes |
//! |--------|--------|-------|
//! | Identity Magazine | Middle East | WordPress category page |
//! | Archiposition | Asia-Pacific | `/items/{id}` links |
//! | Gooood | Asia-Pacific | `.htm` slugs on the architecture category |
//! | Japan Architects | Asia-Pacific | Anti-bot protected, needs fallback fetch |
//! | ProRus | Europe | Title cards, Cyrillic tag pages excluded |
//! | Bauwelt | Europe | Buildings section index |
//! | Domus | Europe | Dated English section URLs |
//! | Metalocus | Europe | `/en/news/{slug}` |
//! | Metropolis | North America | Projects and viewpoints |
//! | Landscape Architecture Magazine | North America | Dated WordPress posts |
//! | World Landscape Architect | International | Long-slug posts only |
//!
//! # Adding a source
//!
//! Write a constructor in [`sources`] (or a bespoke [`SourceScraper`]
//! implementation) and register it in [`register_builtin`]. Nothing else in
//! the pipeline changes.

pub mod pattern;
pub mod sources;

use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{DiscoveryError, RegistryError};
use crate::fetcher::PageSource;
use crate::models::{CandidateUrl, SourceDescriptor};
use crate::registry::ScraperRegistry;
use crate::utils::normalize_url;

/// Capability contract every publication scraper implements.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Route listing and article fetches through the fallback transport when
    /// the primary one fails.
    fn needs_fallback_fetch(&self) -> bool {
        false
    }

    /// Per-source cap on new articles per run. `None` uses the run default.
    fn max_new_articles(&self) -> Option<usize> {
        None
    }

    /// Listing pages to scan. Defaults to the homepage.
    fn listing_pages(&self) -> Vec<String> {
        vec![self.descriptor().homepage_url.clone()]
    }

    /// Pull article links out of one rendered listing page.
    fn extract_links(&self, page_url: &Url, html: &str) -> Result<Vec<Url>, DiscoveryError>;

    /// Load every listing page and collect candidate URLs, de-duplicated in
    /// first-seen order.
    ///
    /// A page that fails to load is skipped as long as another page succeeds.
    /// Finding no links at all is reported as [`DiscoveryError::NoLinks`].
    async fn discover(&self, pages: &dyn PageSource) -> Result<Vec<CandidateUrl>, DiscoveryError> {
        let source_id = self.descriptor().source_id.clone();
        let listing = self.listing_pages();
        let mut links: Vec<Url> = Vec::new();
        let mut last_failure: Option<DiscoveryError> = None;
        let mut loaded = 0usize;

        for page in &listing {
            let page_url = Url::parse(page).map_err(|e| DiscoveryError::Parse {
                url: page.clone(),
                message: e.to_string(),
            })?;
            match pages.listing_html(page, self.needs_fallback_fetch()).await {
                Ok(html) => {
                    loaded += 1;
                    let found = self.extract_links(&page_url, &html)?;
                    debug!(%source_id, page = %page, count = found.len(), "Extracted listing links");
                    links.extend(found);
                }
                Err(e) => {
                    warn!(%source_id, page = %page, error = %e, "Listing page failed");
                    last_failure = Some(DiscoveryError::Listing {
                        url: page.clone(),
                        source: e,
                    });
                }
            }
        }

        if loaded == 0 {
            if let Some(e) = last_failure {
                return Err(e);
            }
        }

        let candidates: Vec<CandidateUrl> = links
            .into_iter()
            .map(|u| u.to_string())
            .unique_by(|u| normalize_url(u))
            .map(|u| CandidateUrl::new(u, &source_id))
            .collect();

        if candidates.is_empty() {
            return Err(DiscoveryError::NoLinks {
                url: listing.join(", "),
            });
        }
        info!(%source_id, count = candidates.len(), "Discovered candidate URLs");
        Ok(candidates)
    }
}

/// Register every built-in publication.
#[instrument(level = "info", skip_all)]
pub fn register_builtin(registry: &mut ScraperRegistry) -> Result<(), RegistryError> {
    let builtins: [(&str, fn() -> pattern::PatternScraper); 11] = [
        ("identity", sources::identity),
        ("archiposition", sources::archiposition),
        ("gooood", sources::gooood),
        ("japan_architects", sources::japan_architects),
        ("prorus", sources::prorus),
        ("bauwelt", sources::bauwelt),
        ("domus", sources::domus),
        ("metalocus", sources::metalocus),
        ("metropolis", sources::metropolis),
        (
            "landscape_architecture_magazine",
            sources::landscape_architecture_magazine,
        ),
        ("world_landscape_architect", sources::world_landscape_architect),
    ];

    for (source_id, build) in builtins {
        registry.register(source_id, move || Arc::new(build()) as Arc<dyn SourceScraper>)?;
    }
    info!(count = registry.len(), "Registered built-in scrapers");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by scraper, registry and pipeline tests.

    use super::*;
    use crate::error::FetchError;
    use crate::models::Region;
    use std::collections::HashMap;

    /// Scraper returning a fixed list of URLs (or a fixed failure).
    pub struct StaticScraper {
        pub descriptor: SourceDescriptor,
        pub urls: Vec<String>,
        pub fail: bool,
        pub fallback: bool,
    }

    impl StaticScraper {
        pub fn new(source_id: &str, urls: &[&str]) -> Self {
            Self {
                descriptor: SourceDescriptor::new(
                    source_id,
                    source_id,
                    &format!("https://{source_id}.example/"),
                    Region::Europe,
                ),
                urls: urls.iter().map(|u| u.to_string()).collect(),
                fail: false,
                fallback: false,
            }
        }

        pub fn failing(source_id: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(source_id, &[])
            }
        }
    }

    #[async_trait]
    impl SourceScraper for StaticScraper {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        fn needs_fallback_fetch(&self) -> bool {
            self.fallback
        }

        fn extract_links(&self, _page_url: &Url, _html: &str) -> Result<Vec<Url>, DiscoveryError> {
            Ok(Vec::new())
        }

        async fn discover(&self, _pages: &dyn PageSource) -> Result<Vec<CandidateUrl>, DiscoveryError> {
            if self.fail {
                return Err(DiscoveryError::Parse {
                    url: self.descriptor.homepage_url.clone(),
                    message: "markup drift".into(),
                });
            }
            Ok(self
                .urls
                .iter()
                .map(|u| CandidateUrl::new(u.clone(), &self.descriptor.source_id))
                .collect())
        }
    }

    /// Page source serving canned HTML keyed by URL.
    #[derive(Default)]
    pub struct CannedPages {
        pub pages: HashMap<String, Result<String, FetchError>>,
    }

    #[async_trait]
    impl PageSource for CannedPages {
        async fn listing_html(&self, url: &str, _use_fallback: bool) -> Result<String, FetchError> {
            self.pages.get(url).cloned().unwrap_or_else(|| {
                Err(FetchError::Empty {
                    url: url.to_string(),
                    message: "not canned".into(),
                })
            })
        }
    }
}
