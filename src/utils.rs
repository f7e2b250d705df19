//! Utility functions for URL handling, log truncation, backoff and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - URL normalisation so ledger keys and object names are stable
//! - Stable, URL-derived object names
//! - String truncation for logging (UTF-8 safe; many sources are CJK or Cyrillic)
//! - JSON error detection for handling LLM response truncation
//! - Exponential backoff with jitter
//! - File system validation for the local output directory

use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Normalise a URL for use as a ledger key.
///
/// Trims whitespace, drops the fragment and removes a trailing `/` from
/// non-root paths. Strings that do not parse as URLs are only trimmed.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_url(" https://a.com/x/#top "), "https://a.com/x");
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

/// Stable object name for an article: `{source_id}-{16 hex chars of sha256(url)}`.
///
/// The same URL always maps to the same name, which makes storage writes
/// idempotent across retries and reruns.
pub fn stable_key(source_id: &str, url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    let hex = format!("{:x}", digest);
    format!("{}-{}", source_id, &hex[..16])
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Strip a Markdown code fence the model may wrap JSON in.
pub fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Delay before retry number `attempt` (1-based).
///
/// ```text
/// delay = min(base * 2^(attempt-1), max) + random_jitter(0..=250ms)
/// ```
pub fn backoff_delay(attempt: usize, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16) as u32;
    let delay = base.saturating_mul(1u32 << shift).min(max);
    if delay.is_zero() {
        return delay;
    }
    let jitter_ms: u64 = rng().random_range(0..=250);
    delay + Duration::from_millis(jitter_ms)
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
