//! Secondary fetch log.
//!
//! Every successful article fetch can be recorded as `{url, source_id,
//! fetched_at}`. Recording is fire-and-forget: it runs on its own task and a
//! failure is logged, never surfaced to the article pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LedgerError;

#[async_trait]
pub trait FetchRecorder: Send + Sync {
    async fn record(&self, url: &str, source_id: &str, fetched_at: DateTime<Utc>) -> Result<(), LedgerError>;
}

/// Recorder used when `--record-fetches` is off.
pub struct NoopRecorder;

#[async_trait]
impl FetchRecorder for NoopRecorder {
    async fn record(&self, _url: &str, _source_id: &str, _fetched_at: DateTime<Utc>) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Appends to the `fetch_log` table next to the ledger.
pub struct PgRecorder {
    pool: PgPool,
}

impl PgRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FetchRecorder for PgRecorder {
    async fn record(&self, url: &str, source_id: &str, fetched_at: DateTime<Utc>) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO fetch_log (url, source_id, fetched_at) VALUES ($1, $2, $3)")
            .bind(url)
            .bind(source_id)
            .bind(fetched_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Record on a detached task. Returns immediately.
pub fn record_detached(recorder: &Arc<dyn FetchRecorder>, url: &str, source_id: &str) {
    let recorder = Arc::clone(recorder);
    let url = url.to_string();
    let source_id = source_id.to_string();
    tokio::spawn(async move {
        match recorder.record(&url, &source_id, Utc::now()).await {
            Ok(()) => debug!(%url, %source_id, "Recorded fetch"),
            Err(e) => warn!(%url, %source_id, error = %e, "Fetch record failed; ignoring"),
        }
    });
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryRecorder;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_detached_eventually_records() {
        let memory = Arc::new(MemoryRecorder::default());
        let recorder: Arc<dyn FetchRecorder> = memory.clone();
        record_detached(&recorder, "https://www.domusweb.it/en/a.html", "domus");

        for _ in 0..50 {
            if !memory.rows.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            memory.rows.lock().unwrap().as_slice(),
            [("https://www.domusweb.it/en/a.html".to_string(), "domus".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failing_recorder_is_swallowed() {
        let memory = Arc::new(MemoryRecorder {
            fail: true,
            ..Default::default()
        });
        let recorder: Arc<dyn FetchRecorder> = memory.clone();
        record_detached(&recorder, "https://a.example/x", "a");

        for _ in 0..50 {
            if memory.attempts() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(memory.attempts(), 1);
        assert!(memory.rows.lock().unwrap().is_empty());
    }
}
