//! Error taxonomy for every pipeline stage.
//!
//! Each external collaborator gets its own error type so the orchestrator can
//! decide, per failure kind, whether an article is skipped, soft-rejected or
//! retried next run. None of these ever escape a single source or article.

use thiserror::Error;

/// Listing-page discovery failed for one source. The source is skipped.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing page {url} could not be loaded: {source}")]
    Listing {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("no article links matched on {url}")]
    NoLinks { url: String },

    #[error("markup could not be parsed on {url}: {message}")]
    Parse { url: String, message: String },
}

/// Article or listing fetch failure. The article is skipped and not marked seen.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out rendering {url}")]
    Timeout { url: String },

    #[error("blocked fetching {url} (status {status:?}): {message}")]
    Blocked {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("no usable content at {url}: {message}")]
    Empty { url: String, message: String },
}

/// A chat-completion call failed.
#[derive(Debug, Clone, Error)]
pub enum AskError {
    #[error("model API call failed: {0}")]
    Api(String),

    #[error("model configuration error: {0}")]
    Config(String),
}

/// The summary model returned something that is not a complete summary.
#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("summary model unavailable: {0}")]
    Unavailable(#[from] AskError),

    #[error("summary was not valid JSON: {0}")]
    Malformed(String),

    #[error("summary is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Object store write/read failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store rejected {key} (status {status})")]
    Status { key: String, status: u16 },

    #[error("object store I/O failed for {key}: {message}")]
    Io { key: String, message: String },

    #[error("could not encode record for {key}: {message}")]
    Encode { key: String, message: String },

    #[error("object store is misconfigured: {0}")]
    Config(String),
}

/// Dedup ledger failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Registration mistakes, caught at startup before any run begins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("factory registered as `{registered}` produced a scraper for `{reported}`")]
    IdMismatch { registered: String, reported: String },

    #[error("source id must not be empty")]
    EmptyId,
}

/// Pipeline configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl FetchError {
    /// The URL the failure refers to.
    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url }
            | FetchError::Blocked { url, .. }
            | FetchError::Empty { url, .. } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_url() {
        let e = FetchError::Blocked {
            url: "https://example.com/a".into(),
            status: Some(403),
            message: "forbidden".into(),
        };
        assert_eq!(e.url(), "https://example.com/a");
        assert!(e.to_string().contains("403"));
    }

    #[test]
    fn test_summarization_error_from_ask() {
        let e: SummarizationError = AskError::Api("boom".into()).into();
        assert!(matches!(e, SummarizationError::Unavailable(_)));
    }
}
