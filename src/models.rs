//! Data models for sources, candidate URLs and processed articles.
//!
//! This module defines the core data structures that flow through the pipeline:
//! - [`SourceDescriptor`]: One registered publication
//! - [`CandidateUrl`]: A link found on a listing page, not yet fetched
//! - [`SeenRecord`]: A ledger row
//! - [`FetchedArticle`]: Rendered article content
//! - [`FilterVerdict`]: Relevance decision from the cheap model
//! - [`ArticleSummary`]: Structured summary from the larger model
//! - [`CandidateRecord`]: The JSON document written under `candidates/`

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Editorial region a publication is grouped under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    MiddleEast,
    AsiaPacific,
    Europe,
    NorthAmerica,
    International,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::MiddleEast => "middle_east",
            Region::AsiaPacific => "asia_pacific",
            Region::Europe => "europe",
            Region::NorthAmerica => "north_america",
            Region::International => "international",
        };
        f.write_str(s)
    }
}

/// A publication known to the registry. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    /// Unique identifier, also used as the object key prefix.
    pub source_id: String,
    /// Human readable publication name.
    pub display_name: String,
    /// Homepage or main category page.
    pub homepage_url: String,
    pub region: Region,
}

impl SourceDescriptor {
    pub fn new(source_id: &str, display_name: &str, homepage_url: &str, region: Region) -> Self {
        Self {
            source_id: source_id.to_string(),
            display_name: display_name.to_string(),
            homepage_url: homepage_url.to_string(),
            region,
        }
    }
}

/// A link found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    pub url: String,
    pub source_id: String,
    pub discovered_at: DateTime<Utc>,
}

impl CandidateUrl {
    pub fn new(url: impl Into<String>, source_id: &str) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.to_string(),
            discovered_at: Utc::now(),
        }
    }
}

/// One row of the dedup ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenRecord {
    pub url: String,
    pub source_id: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Rendered article content, owned by a single article pipeline.
#[derive(Debug, Clone, Default)]
pub struct FetchedArticle {
    pub url: String,
    pub title: String,
    /// Inner HTML of the main article container.
    pub body: String,
    pub published_date: Option<NaiveDate>,
    /// Absolute URL of the hero image, if the page advertises one.
    pub hero_image_ref: Option<String>,
}

impl FetchedArticle {
    /// Body reduced to whitespace-collapsed text, cut at `max_chars` characters.
    pub fn text_excerpt(&self, max_chars: usize) -> String {
        let fragment = scraper::Html::parse_fragment(&self.body);
        let text = fragment
            .root_element()
            .text()
            .flat_map(|t| t.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");
        text.chars().take(max_chars).collect()
    }
}

/// Hero image payload handed to the storage writer.
#[derive(Debug, Clone)]
pub struct HeroImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub original_url: String,
}

/// Outcome of the relevance filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub is_relevant: bool,
    pub reason: String,
}

impl FilterVerdict {
    /// Reason recorded when the filter model could not be reached.
    pub const UNAVAILABLE: &'static str = "FilterUnavailable";

    pub fn include(reason: impl Into<String>) -> Self {
        Self {
            is_relevant: true,
            reason: reason.into(),
        }
    }

    pub fn exclude(reason: impl Into<String>) -> Self {
        Self {
            is_relevant: false,
            reason: reason.into(),
        }
    }

    /// Conservative soft-reject used after the filter exhausted its retries.
    pub fn unavailable() -> Self {
        Self::exclude(Self::UNAVAILABLE)
    }

    pub fn is_unavailable(&self) -> bool {
        !self.is_relevant && self.reason == Self::UNAVAILABLE
    }
}

/// Structured summary produced by the summarizer model.
///
/// The model fills every field except `source_url`, which the pipeline sets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleSummary {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub architect: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub source_url: String,
}

/// Image block of a candidate record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CandidateImage {
    /// Path relative to the candidate JSON, e.g. `../images/domus-1a2b.jpg`.
    pub path: String,
    pub original_url: String,
    pub content_type: String,
}

/// The JSON document stored under `candidates/` for editorial selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CandidateRecord {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub published: Option<NaiveDate>,
    pub project_name: String,
    pub architect: String,
    pub tags: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub image: Option<CandidateImage>,
    pub saved_at: DateTime<Utc>,
}
