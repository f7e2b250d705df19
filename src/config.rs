//! Pipeline limits: concurrency, retries, timeouts and per-source caps.
//!
//! Values come from built-in defaults, optionally overridden by a YAML file
//! (`--config`), then by individual CLI flags.
//!
//! ```yaml
//! source_concurrency: 4
//! article_concurrency: 3
//! max_browser_sessions: 2
//! max_llm_calls: 4
//! max_new_articles: 10
//! run_timeout_secs: 3600
//! ```

use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::cli::Cli;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Sources processed at once.
    pub source_concurrency: usize,
    /// Articles in flight per source.
    pub article_concurrency: usize,
    /// Global cap on concurrent page renders.
    pub max_browser_sessions: usize,
    /// Global cap on concurrent model calls (both tiers).
    pub max_llm_calls: usize,
    /// New articles processed per source per run, unless the scraper sets its own cap.
    pub max_new_articles: usize,
    pub filter_retries: usize,
    pub summary_retries: usize,
    pub store_retries: usize,
    pub retry_base_delay_ms: u64,
    pub navigation_timeout_secs: u64,
    pub image_timeout_secs: u64,
    /// Whole-run deadline. In-flight articles are abandoned when it fires.
    pub run_timeout_secs: u64,
    pub db_max_connections: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_concurrency: 4,
            article_concurrency: 3,
            max_browser_sessions: 2,
            max_llm_calls: 4,
            max_new_articles: 10,
            filter_retries: 3,
            summary_retries: 5,
            store_retries: 3,
            retry_base_delay_ms: 1000,
            navigation_timeout_secs: 45,
            image_timeout_secs: 20,
            run_timeout_secs: 3600,
            db_max_connections: 5,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Defaults, then the `--config` file, then CLI overrides.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match cli.config.as_deref() {
            Some(path) => {
                let c = Self::from_yaml(path)?;
                info!(path, "Loaded pipeline config");
                c
            }
            None => Self::default(),
        };

        if let Some(n) = cli.source_concurrency {
            config.source_concurrency = n;
        }
        if let Some(n) = cli.article_concurrency {
            config.article_concurrency = n;
        }
        if let Some(n) = cli.max_new_articles {
            config.max_new_articles = n;
        }
        if let Some(secs) = cli.run_timeout_secs {
            config.run_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("source_concurrency", self.source_concurrency),
            ("article_concurrency", self.article_concurrency),
            ("max_browser_sessions", self.max_browser_sessions),
            ("max_llm_calls", self.max_llm_calls),
            ("max_new_articles", self.max_new_articles),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }
        if self.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid("run_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_concurrency: 8\nmax_new_articles: 5").unwrap();

        let config = PipelineConfig::from_yaml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.source_concurrency, 8);
        assert_eq!(config.max_new_articles, 5);
        assert_eq!(config.article_concurrency, PipelineConfig::default().article_concurrency);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_concurency: 8").unwrap();
        assert!(matches!(
            PipelineConfig::from_yaml(file.path().to_str().unwrap()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_concurrency: 8\narticle_concurrency: 2").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_from(["archfeed", "--config", &path, "--source-concurrency", "1"]);
        let config = PipelineConfig::resolve(&cli).unwrap();
        assert_eq!(config.source_concurrency, 1);
        assert_eq!(config.article_concurrency, 2);
    }

    #[test]
    fn test_zero_limits_are_invalid() {
        let config = PipelineConfig {
            max_llm_calls: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
