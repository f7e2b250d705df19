//! Pipeline orchestrator.
//!
//! Drives every registered source through
//!
//! ```text
//! discover -> ledger gate -> fetch -> filter -> summarize -> store -> mark seen
//! ```
//!
//! with bounded fan-out across sources and across articles within a source.
//! A failure stops only the article (or, for discovery and the ledger gate,
//! the source) it happened in and is tallied in the [`RunReport`].
//!
//! Ledger policy: an article is marked seen after it is stored, and also
//! after the filter rejects it (including a soft reject because the filter
//! model was unavailable). Fetch, summary and store failures leave it unmarked
//! so the next run retries it.
//!
//! The whole run is bounded by a deadline. When it fires, unsettled articles
//! are dropped at their next await point; the storage writer puts the summary
//! record last, so an abandoned article never leaves a partial record behind.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::fetcher::{ContentFetcher, PageSource};
use crate::filter::AiFilter;
use crate::ledger::DedupLedger;
use crate::models::CandidateUrl;
use crate::recorder::{FetchRecorder, record_detached};
use crate::registry::{RegisteredSource, RegistrySnapshot};
use crate::report::{FailureKind, RunReport, SourceReport};
use crate::storage::{ManifestEntry, StorageWriter};
use crate::summarizer::Summarizer;

/// Injected collaborators.
pub struct PipelineDeps {
    pub pages: Arc<dyn PageSource>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub ledger: DedupLedger,
    pub filter: AiFilter,
    pub summarizer: Summarizer,
    pub writer: StorageWriter,
    pub recorder: Arc<dyn FetchRecorder>,
}

/// Terminal state of one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleOutcome {
    Stored,
    Rejected,
    Failed(FailureKind),
}

pub struct Orchestrator {
    deps: PipelineDeps,
    source_concurrency: usize,
    article_concurrency: usize,
    max_new_articles: usize,
    run_timeout: Duration,
    browser_slots: Semaphore,
    llm_slots: Semaphore,
}

struct RunState {
    sources: Vec<SourceReport>,
    manifest: Vec<ManifestEntry>,
}

/// Handle onto one source's counters.
#[derive(Clone, Copy)]
struct Tally<'a> {
    state: &'a Mutex<RunState>,
    idx: usize,
}

impl Tally<'_> {
    fn bump(&self, f: impl FnOnce(&mut SourceReport)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state.sources[self.idx]);
    }

    fn list(&self, entry: ManifestEntry) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .manifest
            .push(entry);
    }
}

/// Page source that holds a browser slot for each listing render.
struct LimitedPages<'a> {
    inner: &'a dyn PageSource,
    slots: &'a Semaphore,
}

#[async_trait]
impl PageSource for LimitedPages<'_> {
    async fn listing_html(&self, url: &str, use_fallback: bool) -> Result<String, FetchError> {
        let _slot = self.slots.acquire().await.ok();
        self.inner.listing_html(url, use_fallback).await
    }
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, config: &PipelineConfig) -> Self {
        Self {
            deps,
            source_concurrency: config.source_concurrency.max(1),
            article_concurrency: config.article_concurrency.max(1),
            max_new_articles: config.max_new_articles,
            run_timeout: config.run_timeout(),
            browser_slots: Semaphore::new(config.max_browser_sessions.max(1)),
            llm_slots: Semaphore::new(config.max_llm_calls.max(1)),
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Run every source in `snapshot`, filing results under `processing_date`.
    ///
    /// Never fails; everything that went wrong is in the report.
    #[instrument(level = "info", skip_all, fields(%processing_date, sources = snapshot.len()))]
    pub async fn run(&self, snapshot: &RegistrySnapshot, processing_date: NaiveDate) -> RunReport {
        let started_at = Utc::now();
        let state = Mutex::new(RunState {
            sources: snapshot
                .sources()
                .iter()
                .map(|s| SourceReport::new(&s.descriptor.source_id, &s.descriptor.display_name))
                .collect(),
            manifest: Vec::new(),
        });
        info!(
            test_mode = self.deps.ledger.test_mode(),
            source_concurrency = self.source_concurrency,
            article_concurrency = self.article_concurrency,
            store = %self.deps.writer.store().describe(),
            "Run starting"
        );

        let work = stream::iter(snapshot.sources().iter().enumerate())
            .map(|(idx, source)| {
                self.run_source(source, processing_date, Tally { state: &state, idx })
            })
            .buffer_unordered(self.source_concurrency)
            .collect::<Vec<()>>();
        let timed_out = timeout(self.run_timeout, work).await.is_err();
        if timed_out {
            warn!(timeout_secs = self.run_timeout.as_secs(), "Run deadline reached");
        }

        let RunState { sources, manifest } = state.into_inner().unwrap_or_else(PoisonError::into_inner);

        let manifest_total = if manifest.is_empty() {
            None
        } else {
            match self.deps.writer.update_manifest(processing_date, &manifest).await {
                Ok(total) => Some(total),
                Err(e) => {
                    warn!(error = %e, "Manifest update failed; candidates are stored regardless");
                    None
                }
            }
        };

        RunReport {
            processing_date,
            started_at,
            finished_at: Utc::now(),
            test_mode: self.deps.ledger.test_mode(),
            timed_out,
            manifest_total,
            sources,
        }
    }

    #[instrument(level = "info", skip_all, fields(source_id = %source.descriptor.source_id))]
    async fn run_source(&self, source: &RegisteredSource, processing_date: NaiveDate, tally: Tally<'_>) {
        let pages = LimitedPages {
            inner: self.deps.pages.as_ref(),
            slots: &self.browser_slots,
        };
        let candidates = match source.scraper.discover(&pages).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Discovery failed; skipping source");
                tally.bump(|s| {
                    s.fail(FailureKind::DiscoveryFailed);
                    s.completed = true;
                });
                return;
            }
        };
        let discovered = candidates.len();
        tally.bump(|s| s.discovered = discovered);

        let (mut new, seen) = match self.deps.ledger.partition(candidates).await {
            Ok(split) => split,
            Err(e) => {
                error!(error = %e, "Ledger gate failed; skipping source");
                tally.bump(|s| {
                    s.fail(FailureKind::LedgerFailed);
                    s.completed = true;
                });
                return;
            }
        };

        let cap = source.scraper.max_new_articles().unwrap_or(self.max_new_articles);
        let deferred = new.len().saturating_sub(cap);
        new.truncate(cap);
        // `abandoned` holds every queued article until it settles, so articles
        // not yet started when the deadline fires are counted too.
        let queued = new.len();
        tally.bump(|s| {
            s.gated_as_seen = seen.len();
            s.deferred = deferred;
            s.abandoned = queued;
        });
        info!(
            discovered,
            seen = seen.len(),
            new = new.len(),
            deferred,
            "Ledger gate applied"
        );

        stream::iter(new)
            .map(|candidate| self.process_article(source, candidate, processing_date, tally))
            .buffer_unordered(self.article_concurrency)
            .collect::<Vec<()>>()
            .await;

        tally.bump(|s| s.completed = true);
    }

    async fn process_article(
        &self,
        source: &RegisteredSource,
        candidate: CandidateUrl,
        processing_date: NaiveDate,
        tally: Tally<'_>,
    ) {
        let outcome = self.advance(source, &candidate, processing_date, tally).await;
        tally.bump(|s| s.abandoned -= 1);
        debug!(url = %candidate.url, ?outcome, "Article settled");
    }

    #[instrument(level = "info", skip_all, fields(url = %candidate.url))]
    async fn advance(
        &self,
        source: &RegisteredSource,
        candidate: &CandidateUrl,
        processing_date: NaiveDate,
        tally: Tally<'_>,
    ) -> ArticleOutcome {
        let url = candidate.url.as_str();
        let source_id = source.descriptor.source_id.as_str();

        let fetched = {
            let _slot = self.browser_slots.acquire().await.ok();
            self.deps
                .fetcher
                .fetch(url, source.scraper.needs_fallback_fetch())
                .await
        };
        let article = match fetched {
            Ok(article) => article,
            Err(e) => {
                let kind = FailureKind::from(&e);
                warn!(error = %e, ?kind, "Fetch failed; leaving unmarked");
                tally.bump(|s| s.fail(kind));
                return ArticleOutcome::Failed(kind);
            }
        };
        tally.bump(|s| s.fetched += 1);
        record_detached(&self.deps.recorder, url, source_id);

        let verdict = {
            let _slot = self.llm_slots.acquire().await.ok();
            self.deps
                .filter
                .classify(&article, &source.descriptor.display_name)
                .await
        };
        if !verdict.is_relevant {
            let unavailable = verdict.is_unavailable();
            tally.bump(|s| {
                if unavailable {
                    s.fail(FailureKind::FilterUnavailable);
                } else {
                    s.filtered_out += 1;
                }
            });
            self.mark_seen(url, source_id, tally).await;
            return if unavailable {
                ArticleOutcome::Failed(FailureKind::FilterUnavailable)
            } else {
                ArticleOutcome::Rejected
            };
        }

        let summary = {
            let _slot = self.llm_slots.acquire().await.ok();
            self.deps.summarizer.summarize(&article, processing_date).await
        };
        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Summarization failed; leaving unmarked");
                tally.bump(|s| s.fail(FailureKind::SummarizationFailed));
                return ArticleOutcome::Failed(FailureKind::SummarizationFailed);
            }
        };

        let image = match article.hero_image_ref.as_deref() {
            Some(image_url) => match self.deps.fetcher.fetch_image(image_url).await {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(%image_url, error = %e, "Hero image unavailable; storing without it");
                    None
                }
            },
            None => None,
        };

        match self
            .deps
            .writer
            .write(&source.descriptor, &article, &summary, image.as_ref(), processing_date)
            .await
        {
            Ok(stored) => {
                tally.bump(|s| s.stored += 1);
                tally.list(ManifestEntry::for_stored(&stored, source_id, &article.title));
                self.mark_seen(url, source_id, tally).await;
                ArticleOutcome::Stored
            }
            Err(e) => {
                error!(error = %e, "Store failed; leaving unmarked");
                tally.bump(|s| s.fail(FailureKind::StoreFailed));
                ArticleOutcome::Failed(FailureKind::StoreFailed)
            }
        }
    }

    async fn mark_seen(&self, url: &str, source_id: &str, tally: Tally<'_>) {
        match self.deps.ledger.mark_seen(url, source_id).await {
            Ok(_) => tally.bump(|s| s.marked_seen += 1),
            Err(e) => {
                error!(%url, error = %e, "Could not mark article seen");
                tally.bump(|s| s.fail(FailureKind::LedgerFailed));
            }
        }
    }
}
