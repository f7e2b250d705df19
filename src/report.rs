//! Run report: per-source counters and failure tallies.
//!
//! The report is logged at the end of every run and can also be written as
//! JSON (`--report-json`) for whoever schedules the runs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::error::FetchError;

/// Why an article (or a whole source) stopped short of being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DiscoveryFailed,
    FetchTimeout,
    FetchBlocked,
    FetchEmpty,
    FilterUnavailable,
    SummarizationFailed,
    StoreFailed,
    LedgerFailed,
}

impl From<&FetchError> for FailureKind {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::Timeout { .. } => FailureKind::FetchTimeout,
            FetchError::Blocked { .. } => FailureKind::FetchBlocked,
            FetchError::Empty { .. } => FailureKind::FetchEmpty,
        }
    }
}

/// Counters for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub display_name: String,
    pub discovered: usize,
    pub gated_as_seen: usize,
    /// New URLs beyond the per-source cap, left for the next run.
    pub deferred: usize,
    pub fetched: usize,
    pub filtered_out: usize,
    pub stored: usize,
    pub marked_seen: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    /// Queued articles that had not settled when the run deadline fired.
    pub abandoned: usize,
    pub completed: bool,
}

impl SourceReport {
    pub fn new(source_id: &str, display_name: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            display_name: display_name.to_string(),
            ..Default::default()
        }
    }

    pub fn fail(&mut self, kind: FailureKind) {
        *self.failures.entry(kind).or_default() += 1;
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.failures.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub processing_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub test_mode: bool,
    pub timed_out: bool,
    /// Candidates listed in the day's manifest after this run, if it was updated.
    pub manifest_total: Option<usize>,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn source(&self, source_id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn total_stored(&self) -> usize {
        self.sources.iter().map(|s| s.stored).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.sources.iter().map(|s| s.total_failures()).sum()
    }

    /// One log line per source plus a run total.
    pub fn log(&self) {
        for s in &self.sources {
            info!(
                source_id = %s.source_id,
                discovered = s.discovered,
                gated_as_seen = s.gated_as_seen,
                deferred = s.deferred,
                fetched = s.fetched,
                filtered_out = s.filtered_out,
                stored = s.stored,
                failures = ?s.failures,
                abandoned = s.abandoned,
                completed = s.completed,
                "Source report"
            );
        }
        let elapsed = self.finished_at - self.started_at;
        if self.timed_out {
            warn!(
                stored = self.total_stored(),
                failures = self.total_failures(),
                "Run hit its deadline; unsettled articles were abandoned"
            );
        }
        info!(
            date = %self.processing_date,
            sources = self.sources.len(),
            stored = self.total_stored(),
            failures = self.total_failures(),
            elapsed_secs = elapsed.num_seconds(),
            "Run complete"
        );
    }
}

/// Write the report as pretty JSON, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn write_report(report: &RunReport, path: &str) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, json).await?;
    info!("Wrote run report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        let mut domus = SourceReport::new("domus", "Domus");
        domus.discovered = 5;
        domus.stored = 2;
        domus.fail(FailureKind::FetchTimeout);
        domus.fail(FailureKind::FetchTimeout);
        domus.fail(FailureKind::StoreFailed);
        RunReport {
            processing_date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            test_mode: false,
            timed_out: false,
            manifest_total: Some(2),
            sources: vec![domus, SourceReport::new("bauwelt", "Bauwelt")],
        }
    }

    #[test]
    fn test_failure_tallies() {
        let r = report();
        let domus = r.source("domus").unwrap();
        assert_eq!(domus.failure_count(FailureKind::FetchTimeout), 2);
        assert_eq!(domus.failure_count(FailureKind::FetchBlocked), 0);
        assert_eq!(r.total_failures(), 3);
        assert_eq!(r.total_stored(), 2);
    }

    #[test]
    fn test_failure_kinds_serialize_as_snake_case_keys() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["sources"][0]["failures"]["fetch_timeout"], 2);
        assert_eq!(json["processing_date"], "2026-01-20");
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        write_report(&report(), path.to_str().unwrap()).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["sources"][1]["source_id"], "bauwelt");
    }

    #[test]
    fn test_fetch_error_maps_to_kind() {
        let e = FetchError::Empty {
            url: "u".into(),
            message: "m".into(),
        };
        assert_eq!(FailureKind::from(&e), FailureKind::FetchEmpty);
    }
}
