//! Cross-run dedup ledger.
//!
//! The ledger is the durable set of article URLs the pipeline has already
//! processed. It is consulted once per candidate before any paid work happens
//! and written once per article after the article reached a final state.
//!
//! Linearizability comes from the store's unique key on `url`, not from
//! in-process locking: two concurrent `mark_seen` calls for the same URL both
//! succeed and exactly one row exists afterwards.
//!
//! # Backends
//!
//! - [`PgSeenStore`]: Postgres table `seen_articles`, migrated on connect
//! - [`MemorySeenStore`]: process-local map for tests and `--dry-run`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::LedgerError;
use crate::models::{CandidateUrl, SeenRecord};
use crate::utils::normalize_url;

/// Result of an insert into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Inserted,
    /// The key already existed. Treated as success.
    AlreadySeen,
}

/// Aggregate ledger statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: i64,
    pub oldest_seen: Option<DateTime<Utc>>,
    pub newest_seen: Option<DateTime<Utc>>,
}

/// Durable key-unique storage behind the ledger.
///
/// All URLs passed in are already normalised.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn contains(&self, url: &str) -> Result<bool, LedgerError>;

    /// Subset of `urls` already present.
    async fn contains_any(&self, urls: &[String]) -> Result<HashSet<String>, LedgerError>;

    async fn insert(&self, url: &str, source_id: &str) -> Result<MarkOutcome, LedgerError>;

    async fn stats(&self, source_id: Option<&str>) -> Result<LedgerStats, LedgerError>;

    /// Row counts per source, largest first.
    async fn source_counts(&self) -> Result<Vec<(String, i64)>, LedgerError>;

    async fn clear_source(&self, source_id: &str) -> Result<u64, LedgerError>;
}

/// Gatekeeper in front of a [`SeenStore`].
#[derive(Clone)]
pub struct DedupLedger {
    store: Arc<dyn SeenStore>,
    test_mode: bool,
}

impl DedupLedger {
    pub fn new(store: Arc<dyn SeenStore>, test_mode: bool) -> Self {
        if test_mode {
            warn!("Ledger TEST MODE enabled: every URL will be treated as new");
        }
        Self { store, test_mode }
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Whether `url` was processed by an earlier run. Always `false` in test mode.
    #[instrument(level = "debug", skip(self))]
    pub async fn has_seen(&self, url: &str) -> Result<bool, LedgerError> {
        if self.test_mode {
            return Ok(false);
        }
        self.store.contains(&normalize_url(url)).await
    }

    /// Record `url` as processed. A duplicate is a no-op success.
    ///
    /// Not affected by test mode.
    #[instrument(level = "debug", skip(self))]
    pub async fn mark_seen(&self, url: &str, source_id: &str) -> Result<MarkOutcome, LedgerError> {
        let outcome = self.store.insert(&normalize_url(url), source_id).await?;
        if outcome == MarkOutcome::AlreadySeen {
            debug!(%url, source_id, "URL already in ledger");
        }
        Ok(outcome)
    }

    /// Split candidates into `(new, seen)` with a single store round trip.
    ///
    /// Candidates sharing a normalised URL collapse to the first one. Order
    /// within each half follows the input order.
    #[instrument(level = "debug", skip_all, fields(count = candidates.len()))]
    pub async fn partition(
        &self,
        candidates: Vec<CandidateUrl>,
    ) -> Result<(Vec<CandidateUrl>, Vec<CandidateUrl>), LedgerError> {
        let keyed: Vec<(CandidateUrl, String)> = candidates
            .into_iter()
            .map(|c| {
                let key = normalize_url(&c.url);
                (c, key)
            })
            .unique_by(|(_, key)| key.clone())
            .collect();
        if self.test_mode || keyed.is_empty() {
            return Ok((keyed.into_iter().map(|(c, _)| c).collect(), Vec::new()));
        }
        let keys: Vec<String> = keyed.iter().map(|(_, key)| key.clone()).collect();
        let seen = self.store.contains_any(&keys).await?;
        let (seen_half, new_half): (Vec<_>, Vec<_>) =
            keyed.into_iter().partition(|(_, key)| seen.contains(key));
        Ok((
            new_half.into_iter().map(|(c, _)| c).collect(),
            seen_half.into_iter().map(|(c, _)| c).collect(),
        ))
    }

    pub async fn stats(&self, source_id: Option<&str>) -> Result<LedgerStats, LedgerError> {
        self.store.stats(source_id).await
    }

    pub async fn source_counts(&self) -> Result<Vec<(String, i64)>, LedgerError> {
        self.store.source_counts().await
    }

    #[instrument(level = "info", skip(self))]
    pub async fn clear_source(&self, source_id: &str) -> Result<u64, LedgerError> {
        let deleted = self.store.clear_source(source_id).await?;
        info!(source_id, deleted, "Cleared tracked URLs for source");
        Ok(deleted)
    }
}

/// Postgres-backed ledger store.
pub struct PgSeenStore {
    pool: PgPool,
}

impl PgSeenStore {
    /// Connect, then run the embedded migrations.
    #[instrument(level = "info", skip_all, fields(max_connections))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(60))
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Ledger connected to Postgres");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SeenStore for PgSeenStore {
    async fn contains(&self, url: &str) -> Result<bool, LedgerError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM seen_articles WHERE url = $1)",
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn contains_any(&self, urls: &[String]) -> Result<HashSet<String>, LedgerError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT url FROM seen_articles WHERE url = ANY($1)",
        )
        .bind(urls)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert(&self, url: &str, source_id: &str) -> Result<MarkOutcome, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO seen_articles (url, source_id)
            VALUES ($1, $2)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(url)
        .bind(source_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(MarkOutcome::AlreadySeen),
            Ok(_) => Ok(MarkOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(MarkOutcome::AlreadySeen)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stats(&self, source_id: Option<&str>) -> Result<LedgerStats, LedgerError> {
        let (total, oldest_seen, newest_seen) = sqlx::query_as::<
            _,
            (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>),
        >(
            r#"
            SELECT COUNT(*), MIN(first_seen_at), MAX(first_seen_at)
            FROM seen_articles
            WHERE $1::TEXT IS NULL OR source_id = $1
            "#,
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            total,
            oldest_seen,
            newest_seen,
        })
    }

    async fn source_counts(&self) -> Result<Vec<(String, i64)>, LedgerError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT source_id, COUNT(*) AS count
            FROM seen_articles
            GROUP BY source_id
            ORDER BY count DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clear_source(&self, source_id: &str) -> Result<u64, LedgerError> {
        let done = sqlx::query("DELETE FROM seen_articles WHERE source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

/// In-process ledger store.
#[derive(Default)]
pub struct MemorySeenStore {
    rows: Mutex<HashMap<String, SeenRecord>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with `(url, source_id)` pairs.
    pub fn with_seen<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock().unwrap_or_else(PoisonError::into_inner);
            for (url, source_id) in entries {
                let url = normalize_url(url);
                rows.insert(
                    url.clone(),
                    SeenRecord {
                        url,
                        source_id: source_id.to_string(),
                        first_seen_at: Utc::now(),
                    },
                );
            }
        }
        store
    }

    /// Snapshot of every row.
    pub fn records(&self) -> Vec<SeenRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn contains(&self, url: &str) -> Result<bool, LedgerError> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url))
    }

    async fn contains_any(&self, urls: &[String]) -> Result<HashSet<String>, LedgerError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(urls
            .iter()
            .filter(|u| rows.contains_key(u.as_str()))
            .cloned()
            .collect())
    }

    async fn insert(&self, url: &str, source_id: &str) -> Result<MarkOutcome, LedgerError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.contains_key(url) {
            return Ok(MarkOutcome::AlreadySeen);
        }
        rows.insert(
            url.to_string(),
            SeenRecord {
                url: url.to_string(),
                source_id: source_id.to_string(),
                first_seen_at: Utc::now(),
            },
        );
        Ok(MarkOutcome::Inserted)
    }

    async fn stats(&self, source_id: Option<&str>) -> Result<LedgerStats, LedgerError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&SeenRecord> = rows
            .values()
            .filter(|r| source_id.is_none_or(|s| r.source_id == s))
            .collect();
        Ok(LedgerStats {
            total: matching.len() as i64,
            oldest_seen: matching.iter().map(|r| r.first_seen_at).min(),
            newest_seen: matching.iter().map(|r| r.first_seen_at).max(),
        })
    }

    async fn source_counts(&self) -> Result<Vec<(String, i64)>, LedgerError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts: HashMap<String, i64> = HashMap::new();
        for r in rows.values() {
            *counts.entry(r.source_id.clone()).or_default() += 1;
        }
        let mut out: Vec<(String, i64)> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out)
    }

    async fn clear_source(&self, source_id: &str) -> Result<u64, LedgerError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = rows.len();
        rows.retain(|_, r| r.source_id != source_id);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(store: Arc<MemorySeenStore>, test_mode: bool) -> DedupLedger {
        DedupLedger::new(store, test_mode)
    }

    #[tokio::test]
    async fn test_has_seen_after_mark() {
        let store = Arc::new(MemorySeenStore::new());
        let ledger = ledger(store.clone(), false);

        assert!(!ledger.has_seen("https://a.com/x").await.unwrap());
        ledger.mark_seen("https://a.com/x", "domus").await.unwrap();
        assert!(ledger.has_seen("https://a.com/x").await.unwrap());
        // Normalised form is the same key.
        assert!(ledger.has_seen("https://a.com/x/#frag").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_seen_is_idempotent() {
        let store = Arc::new(MemorySeenStore::new());
        let ledger = ledger(store.clone(), false);

        let first = ledger.mark_seen("https://a.com/x", "domus").await.unwrap();
        let second = ledger.mark_seen("https://a.com/x", "domus").await.unwrap();

        assert_eq!(first, MarkOutcome::Inserted);
        assert_eq!(second, MarkOutcome::AlreadySeen);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_marks_for_distinct_urls() {
        let store = Arc::new(MemorySeenStore::new());
        let ledger = ledger(store.clone(), false);

        let urls: Vec<String> = (0..20).map(|i| format!("https://a.com/{i}")).collect();
        let marks = urls.iter().map(|u| ledger.mark_seen(u, "domus"));
        let results = futures::future::join_all(marks).await;

        assert!(results.iter().all(|r| matches!(r, Ok(MarkOutcome::Inserted))));
        assert_eq!(store.len(), 20);
    }

    #[tokio::test]
    async fn test_test_mode_ignores_reads_but_still_writes() {
        let store = Arc::new(MemorySeenStore::with_seen([("https://a.com/x", "domus")]));
        let ledger = ledger(store.clone(), true);

        assert!(!ledger.has_seen("https://a.com/x").await.unwrap());
        ledger.mark_seen("https://a.com/y", "domus").await.unwrap();
        assert_eq!(store.len(), 2);

        let (new, seen) = ledger
            .partition(vec![CandidateUrl::new("https://a.com/x", "domus")])
            .await
            .unwrap();
        assert_eq!(new.len(), 1);
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_partition_collapses_equivalent_urls() {
        let store = Arc::new(MemorySeenStore::new());
        let candidates = vec![
            CandidateUrl::new("https://prorus.ru/projects/new-museum", "prorus"),
            CandidateUrl::new("https://prorus.ru/projects/new-museum/", "prorus"),
            CandidateUrl::new("https://prorus.ru/projects/new-museum#gallery", "prorus"),
        ];

        for test_mode in [false, true] {
            let (new, seen) = ledger(store.clone(), test_mode)
                .partition(candidates.clone())
                .await
                .unwrap();
            let new: Vec<&str> = new.iter().map(|c| c.url.as_str()).collect();
            assert_eq!(new, ["https://prorus.ru/projects/new-museum"]);
            assert!(seen.is_empty());
        }
    }

    #[tokio::test]
    async fn test_partition_preserves_order() {
        let store = Arc::new(MemorySeenStore::with_seen([
            ("https://a.com/2", "domus"),
            ("https://a.com/4", "domus"),
        ]));
        let ledger = ledger(store, false);

        let candidates = (1..=5)
            .map(|i| CandidateUrl::new(format!("https://a.com/{i}"), "domus"))
            .collect();
        let (new, seen) = ledger.partition(candidates).await.unwrap();

        let new: Vec<&str> = new.iter().map(|c| c.url.as_str()).collect();
        let seen: Vec<&str> = seen.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(new, ["https://a.com/1", "https://a.com/3", "https://a.com/5"]);
        assert_eq!(seen, ["https://a.com/2", "https://a.com/4"]);
    }

    #[tokio::test]
    async fn test_stats_and_clear_source() {
        let store = Arc::new(MemorySeenStore::with_seen([
            ("https://a.com/1", "domus"),
            ("https://a.com/2", "domus"),
            ("https://b.com/1", "bauwelt"),
        ]));
        let ledger = ledger(store.clone(), false);

        assert_eq!(ledger.stats(None).await.unwrap().total, 3);
        assert_eq!(ledger.stats(Some("domus")).await.unwrap().total, 2);
        assert_eq!(
            ledger.source_counts().await.unwrap(),
            vec![("domus".to_string(), 2), ("bauwelt".to_string(), 1)]
        );

        assert_eq!(ledger.clear_source("domus").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(ledger.stats(Some("domus")).await.unwrap().total, 0);
        assert!(ledger.stats(Some("domus")).await.unwrap().oldest_seen.is_none());
    }
}
