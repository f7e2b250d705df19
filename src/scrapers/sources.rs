//! Built-in publication definitions.
//!
//! Each function returns a fresh [`PatternScraper`] configured for one
//! publication's listing markup. Patterns match the percent-decoded URL path.

use super::pattern::PatternScraper;
use crate::models::{Region, SourceDescriptor};

// WordPress plumbing that shows up in every theme's navigation.
const WP_EXCLUDES: &str = r"^/(category|tag|page|author|wp-content|wp-admin|feed|comments|search)/";

pub fn identity() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "identity",
        "Identity Magazine",
        "https://identity.ae/category/architecture/",
        Region::MiddleEast,
    ))
    .include(r"^/[^/]{3,}(/[^/]+)*/$")
    .exclude(WP_EXCLUDES)
    .exclude(r"^/(privacy|terms|about|contact|subscribe|newsletter|advertise)")
    .exclude(r"^/\d{4}(/\d{2})?/$")
}

pub fn archiposition() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "archiposition",
        "Archiposition",
        "https://www.archiposition.com",
        Region::AsiaPacific,
    ))
    .listing("https://www.archiposition.com/category/1675")
    .include(r"^/items/[a-zA-Z0-9]+$")
    .exclude(r"^/items/(competition|spaceresearch|customize|jobservice)$")
    .exclude(r"^/items/(20180525080701|20180530191342|20180527092142|20180528083806|20180527092602)$")
}

pub fn gooood() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "gooood",
        "Gooood",
        "https://www.gooood.cn/category/type/architecture",
        Region::AsiaPacific,
    ))
    .include(r"(?i)^/[a-z0-9-]+\.htm$")
    .exclude(r"^/(category|tag|company|submissions|aboutus|filter|country)")
}

/// Sits behind bot protection; listing and articles go through the fallback transport.
pub fn japan_architects() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "japan_architects",
        "Japan Architects",
        "https://www.japan-architects.com/ja",
        Region::AsiaPacific,
    ))
    .include(r"^/ja/architecture-news/.+")
    .with_fallback()
    .max_new(15)
}

pub fn prorus() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "prorus",
        "ProRus",
        "https://prorus.ru/projects/",
        Region::Europe,
    ))
    .anchors("div.article-item-title a[href]")
    .include(r"^/projects/[^/]{3,}/?$")
    // Tag pages carry Cyrillic slugs; projects are transliterated.
    .exclude(r"[\x{0400}-\x{04FF}]")
}

pub fn bauwelt() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "bauwelt",
        "Bauwelt",
        "https://www.bauwelt.de/rubriken/bauten/standard_index_2073531.html",
        Region::Europe,
    ))
    .include(r"^/rubriken/bauten/.+\.html$")
    .exclude(r"standard_index_")
}

pub fn domus() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "domus",
        "Domus",
        "https://www.domusweb.it/en.html",
        Region::Europe,
    ))
    .include(r"^/en/(architecture|news|design|art|interiors)/\d{4}/\d{2}/\d{2}/.+\.html$")
}

pub fn metalocus() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "metalocus",
        "Metalocus",
        "https://www.metalocus.es/en",
        Region::Europe,
    ))
    .include(r"(?i)^/en/news/[a-z0-9-]+$")
}

pub fn metropolis() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "metropolis",
        "Metropolis",
        "https://metropolismag.com/",
        Region::NorthAmerica,
    ))
    .include(r"^/(projects|viewpoints|profiles)/[a-z0-9-]+/?$")
    .min_slug_words(3)
}

pub fn landscape_architecture_magazine() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "landscape_architecture_magazine",
        "Landscape Architecture Magazine",
        "https://landscapearchitecturemagazine.org/",
        Region::NorthAmerica,
    ))
    .include(r"^/20\d{2}/\d{2}/[a-z0-9-]+/?$")
    .include(r"^/20\d{2}/[a-z0-9-]+/?$")
}

pub fn world_landscape_architect() -> PatternScraper {
    PatternScraper::new(SourceDescriptor::new(
        "world_landscape_architect",
        "World Landscape Architect",
        "https://worldlandscapearchitect.com/",
        Region::International,
    ))
    .include(r"^/[a-z0-9-]+/?$")
    .exclude(r"(?i)^/(landscape-architect|job|job-listing|category|shop|cart|checkout|about|contact-us|advertise|submissions|support-wla|supporters|product)/")
    .exclude(r"(?i)^/(design-discipline|editor-posts|review|student|general|disclaimer|refunds-policy)/")
    .exclude(r"(?i)^/(privacy-policy|individual-membership|design-firm-membership|product-service-membership)")
    .min_slug_words(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::SourceScraper;
    use url::Url;

    fn links(s: &PatternScraper, html: &str) -> Vec<String> {
        let page = Url::parse(&s.descriptor().homepage_url).unwrap();
        s.extract_links(&page, html)
            .unwrap()
            .into_iter()
            .map(|u| u.path().to_string())
            .collect()
    }

    #[test]
    fn test_identity_requires_trailing_slash_and_skips_archives() {
        let found = links(
            &identity(),
            r#"<a href="/museum-of-the-future-opens/">a</a>
               <a href="/category/architecture/">b</a>
               <a href="/2026/01/">c</a>
               <a href="/no-slash">d</a>
               <a href="/about-us/">e</a>"#,
        );
        assert_eq!(found, ["/museum-of-the-future-opens/"]);
    }

    #[test]
    fn test_archiposition_items_only() {
        let found = links(
            &archiposition(),
            r#"<a href="/items/8def04b14c">a</a>
               <a href="/items/competition">b</a>
               <a href="/category/1675">c</a>"#,
        );
        assert_eq!(found, ["/items/8def04b14c"]);
    }

    #[test]
    fn test_prorus_rejects_cyrillic_and_uses_title_cards() {
        let found = links(
            &prorus(),
            r#"<a href="/projects/skip-menu/">menu</a>
               <div class="article-item-title"><a href="/projects/dom-kultury/">ok</a></div>
               <div class="article-item-title"><a href="/projects/%D0%B4%D0%BE%D0%BC/">tag</a></div>"#,
        );
        assert_eq!(found, ["/projects/dom-kultury/"]);
    }

    #[test]
    fn test_landscape_architecture_magazine_dated_posts() {
        let found = links(
            &landscape_architecture_magazine(),
            r#"<a href="/2026/01/a-park-reborn/">a</a>
               <a href="/2026/river-edges/">b</a>
               <a href="/issues/">c</a>"#,
        );
        assert_eq!(found, ["/2026/01/a-park-reborn/", "/2026/river-edges/"]);
    }

    #[test]
    fn test_world_landscape_architect_needs_long_slug() {
        let found = links(
            &world_landscape_architect(),
            r#"<a href="/urbastyle/">profile</a>
               <a href="/a-new-rhythm-for-the-waterfront/">post</a>
               <a href="/job/senior-landscape-architect-needed-now/">job</a>"#,
        );
        assert_eq!(found, ["/a-new-rhythm-for-the-waterfront/"]);
    }

    #[test]
    fn test_japan_architects_uses_fallback_and_larger_cap() {
        let s = japan_architects();
        assert!(s.needs_fallback_fetch());
        assert_eq!(s.max_new_articles(), Some(15));
        assert!(!domus().needs_fallback_fetch());
    }
}
