//! Storage writer: files summaries and hero images under the day's folders.
//!
//! The image goes first, under the date-level `images/` bucket. The summary
//! record goes second, under `candidates/`, and points at the image with a
//! relative path. Both object names derive from the article URL, so a retried
//! or repeated write overwrites the same keys instead of creating copies.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use super::layout::{StatusBucket, StorageLocation};
use super::store::ObjectStore;
use crate::error::StoreError;
use crate::models::{
    ArticleSummary, CandidateImage, CandidateRecord, FetchedArticle, HeroImage, SourceDescriptor,
};
use crate::utils::{backoff_delay, stable_key};

const MANIFEST_NAME: &str = "manifest.json";
const JSON: &str = "application/json";

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArticle {
    pub id: String,
    /// Always the `candidates` location of the processing date.
    pub location: StorageLocation,
    pub record_key: String,
    pub image_key: Option<String>,
}

/// One line of the daily manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub record_path: String,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceTally {
    pub count: usize,
    pub article_ids: Vec<String>,
}

/// `candidates/manifest.json`: every candidate filed on a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub date: NaiveDate,
    pub updated_at: chrono::DateTime<Utc>,
    pub total_candidates: usize,
    pub sources: BTreeMap<String, SourceTally>,
    pub candidates: Vec<ManifestEntry>,
}

impl ManifestEntry {
    pub fn for_stored(stored: &StoredArticle, source_id: &str, title: &str) -> Self {
        Self {
            id: stored.id.clone(),
            source_id: source_id.to_string(),
            title: title.to_string(),
            record_path: stored.record_key.clone(),
            image_path: stored.image_key.clone(),
        }
    }
}

pub struct StorageWriter {
    store: Arc<dyn ObjectStore>,
    retries: usize,
    base_delay: Duration,
}

impl StorageWriter {
    /// `retries` is the number of extra attempts per object after the first.
    pub fn new(store: Arc<dyn ObjectStore>, retries: usize, base_delay: Duration) -> Self {
        Self {
            store,
            retries,
            base_delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// File one article for `processing_date`.
    ///
    /// A failing summary write retries only the summary; the image already
    /// written is not uploaded again.
    #[instrument(level = "info", skip_all, fields(source_id = %source.source_id, url = %article.url))]
    pub async fn write(
        &self,
        source: &SourceDescriptor,
        article: &FetchedArticle,
        summary: &ArticleSummary,
        image: Option<&HeroImage>,
        processing_date: NaiveDate,
    ) -> Result<StoredArticle, StoreError> {
        let id = stable_key(&source.source_id, &article.url);
        let candidates = StorageLocation::for_date(processing_date, StatusBucket::Candidates);
        let images = candidates.with_bucket(StatusBucket::Images);

        let mut image_block = None;
        let mut image_key = None;
        if let Some(image) = image {
            let ext = image_extension(image.content_type.as_deref(), &image.original_url);
            let name = format!("{id}.{ext}");
            let key = images.key(&name);
            let content_type = content_type_for(ext);
            self.put_with_retry(&key, &image.bytes, content_type).await?;
            image_block = Some(CandidateImage {
                path: format!("../{}/{}", StatusBucket::Images, name),
                original_url: image.original_url.clone(),
                content_type: content_type.to_string(),
            });
            image_key = Some(key);
        }

        let record = CandidateRecord {
            id: id.clone(),
            source_id: source.source_id.clone(),
            source_name: source.display_name.clone(),
            title: article.title.clone(),
            url: article.url.clone(),
            published: article.published_date,
            project_name: summary.project_name.clone(),
            architect: summary.architect.clone(),
            tags: summary.tags.clone(),
            abstract_text: summary.abstract_text.clone(),
            image: image_block,
            saved_at: Utc::now(),
        };
        let record_key = candidates.key(&format!("{id}.json"));
        let body = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Encode {
            key: record_key.clone(),
            message: e.to_string(),
        })?;
        self.put_with_retry(&record_key, &body, JSON).await?;

        info!(%record_key, has_image = image_key.is_some(), "Stored candidate");
        Ok(StoredArticle {
            id,
            location: candidates,
            record_key,
            image_key,
        })
    }

    /// Merge `entries` into the date's manifest (GET, merge by id, PUT).
    /// Returns the number of candidates listed afterwards.
    #[instrument(level = "info", skip_all, fields(%date, new = entries.len()))]
    pub async fn update_manifest(
        &self,
        date: NaiveDate,
        entries: &[ManifestEntry],
    ) -> Result<usize, StoreError> {
        let key = StorageLocation::for_date(date, StatusBucket::Candidates).key(MANIFEST_NAME);

        let mut candidates: Vec<ManifestEntry> = match self.store.get(&key).await? {
            Some(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(existing) => existing.candidates,
                Err(e) => {
                    warn!(%key, error = %e, "Existing manifest unreadable; rebuilding");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        for entry in entries {
            match candidates.iter_mut().find(|c| c.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => candidates.push(entry.clone()),
            }
        }

        let mut sources: BTreeMap<String, SourceTally> = BTreeMap::new();
        for c in &candidates {
            let tally = sources.entry(c.source_id.clone()).or_insert(SourceTally {
                count: 0,
                article_ids: Vec::new(),
            });
            tally.count += 1;
            tally.article_ids.push(c.id.clone());
        }
        for tally in sources.values_mut() {
            tally.article_ids.sort();
        }

        let manifest = Manifest {
            date,
            updated_at: Utc::now(),
            total_candidates: candidates.len(),
            sources,
            candidates,
        };
        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| StoreError::Encode {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.put_with_retry(&key, &body, JSON).await?;
        info!(%key, total = manifest.total_candidates, "Updated manifest");
        Ok(manifest.total_candidates)
    }

    async fn put_with_retry(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        let mut attempt = 0usize;
        loop {
            match self.store.put(key, bytes, content_type).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.retries {
                        warn!(%key, attempt, error = %e, "PUT exhausted retries");
                        return Err(e);
                    }
                    let delay = backoff_delay(attempt, self.base_delay, Duration::from_secs(30));
                    warn!(%key, attempt, ?delay, error = %e, "PUT failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}

/// File extension from the content type, else the URL, else `jpg`.
pub fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    if let Some(ct) = content_type {
        let mime = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" => return "jpg",
            "image/png" => return "png",
            "image/webp" => return "webp",
            "image/gif" => return "gif",
            "image/svg+xml" => return "svg",
            _ => {}
        }
    }

    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    for (suffix, ext) in [
        (".jpg", "jpg"),
        (".jpeg", "jpg"),
        (".png", "png"),
        (".webp", "webp"),
        (".gif", "gif"),
        (".svg", "svg"),
    ] {
        if path.ends_with(suffix) {
            return ext;
        }
    }
    "jpg"
}

pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;
    use crate::storage::store::MemoryStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 20).unwrap()
    }

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("domus", "Domus", "https://www.domusweb.it/en.html", Region::Europe)
    }

    fn article() -> FetchedArticle {
        FetchedArticle {
            url: "https://www.domusweb.it/en/news/2026/01/15/cloud-11.html".into(),
            title: "Cloud 11".into(),
            body: "<p>Body</p>".into(),
            published_date: NaiveDate::from_ymd_opt(2026, 1, 15),
            hero_image_ref: Some("https://www.domusweb.it/hero.png".into()),
        }
    }

    fn summary() -> ArticleSummary {
        ArticleSummary {
            project_name: "Cloud 11".into(),
            architect: "Snøhetta".into(),
            tags: vec!["office".into()],
            abstract_text: "A timber office. It is large.".into(),
            source_url: article().url,
        }
    }

    fn image() -> HeroImage {
        HeroImage {
            bytes: vec![7; 2048],
            content_type: None,
            original_url: "https://www.domusweb.it/hero.png".into(),
        }
    }

    #[tokio::test]
    async fn test_write_places_image_and_record() {
        let store = Arc::new(MemoryStore::new());
        let writer = StorageWriter::new(store.clone(), 2, Duration::ZERO);

        let stored = writer
            .write(&source(), &article(), &summary(), Some(&image()), date())
            .await
            .unwrap();

        let id = stable_key("domus", &article().url);
        assert_eq!(stored.location.bucket, StatusBucket::Candidates);
        assert_eq!(
            stored.record_key,
            format!("2026/January/Week-4/2026-01-20/candidates/{id}.json")
        );
        assert_eq!(
            stored.image_key.as_deref(),
            Some(format!("2026/January/Week-4/2026-01-20/images/{id}.png").as_str())
        );

        let record: CandidateRecord =
            serde_json::from_slice(&store.object(&stored.record_key).unwrap()).unwrap();
        let img = record.image.unwrap();
        assert_eq!(img.path, format!("../images/{id}.png"));
        assert_eq!(img.content_type, "image/png");
        assert_eq!(record.published, NaiveDate::from_ymd_opt(2026, 1, 15));
    }

    #[tokio::test]
    async fn test_summary_retry_does_not_rewrite_image() {
        let store = Arc::new(MemoryStore::new());
        store.fail_puts(".json", 2);
        let writer = StorageWriter::new(store.clone(), 3, Duration::ZERO);

        let stored = writer
            .write(&source(), &article(), &summary(), Some(&image()), date())
            .await
            .unwrap();

        assert_eq!(store.put_attempts(stored.image_key.as_deref().unwrap()), 1);
        assert_eq!(store.put_attempts(&stored.record_key), 3);
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_write_fails_after_retries() {
        let store = Arc::new(MemoryStore::new());
        store.fail_puts(".json", 10);
        let writer = StorageWriter::new(store.clone(), 2, Duration::ZERO);

        let err = writer
            .write(&source(), &article(), &summary(), None, date())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let writer = StorageWriter::new(store.clone(), 0, Duration::ZERO);
        for _ in 0..2 {
            writer
                .write(&source(), &article(), &summary(), Some(&image()), date())
                .await
                .unwrap();
        }
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_manifest_merges_by_id() {
        let store = Arc::new(MemoryStore::new());
        let writer = StorageWriter::new(store.clone(), 0, Duration::ZERO);
        let entry = |id: &str, source: &str| ManifestEntry {
            id: id.into(),
            source_id: source.into(),
            title: id.into(),
            record_path: format!("{id}.json"),
            image_path: None,
        };

        writer
            .update_manifest(date(), &[entry("domus-1", "domus"), entry("bauwelt-1", "bauwelt")])
            .await
            .unwrap();
        let total = writer
            .update_manifest(date(), &[entry("domus-1", "domus"), entry("domus-2", "domus")])
            .await
            .unwrap();
        assert_eq!(total, 3);

        let key = "2026/January/Week-4/2026-01-20/candidates/manifest.json";
        let manifest: Manifest = serde_json::from_slice(&store.object(key).unwrap()).unwrap();
        assert_eq!(manifest.sources["domus"].article_ids, ["domus-1", "domus-2"]);
        assert_eq!(manifest.sources["bauwelt"].count, 1);
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension(Some("image/webp; charset=binary"), "x"), "webp");
        assert_eq!(image_extension(None, "https://a.com/p/hero.JPEG?w=800"), "jpg");
        assert_eq!(image_extension(None, "https://a.com/p/hero"), "jpg");
        assert_eq!(image_extension(Some("application/octet-stream"), "https://a.com/h.png"), "png");
    }
}
