//! LLM API interaction with exponential backoff retry logic.
//!
//! Both model tiers (the cheap relevance filter and the larger summarizer)
//! talk to an OpenAI-compatible endpoint through `awful_aj`. Each tier is an
//! `awful_aj` config + template pair loaded at startup.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`AwfulAsk`]: Owns one tier's config and template and calls `awful_aj::api::ask`
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//!
//! # Retry Strategy
//!
//! - Bounded retry attempts (per tier, from the pipeline config)
//! - Exponential backoff starting at `base_delay`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use async_trait::async_trait;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, config_dir, template::ChatTemplate};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::error::AskError;
use crate::utils::backoff_delay;

/// Trait for async LLM interaction.
///
/// The `awful_aj` client future is not `Send`, so implementations run on the
/// orchestrating task and are never spawned.
#[async_trait(?Send)]
pub trait AskAsync {
    /// Send text to the LLM and receive its raw reply.
    async fn ask(&self, text: &str) -> Result<String, AskError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// # Example
    ///
    /// ```ignore
    /// let filter_model = AwfulAsk::load(None, "arch_filter").await?;
    /// let filter_model = RetryAsk::new(filter_model, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait(?Send)]
impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<String, AskError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    // Configuration problems do not get better by waiting.
                    if attempt > self.max_retries || matches!(e, AskError::Config(_)) {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = backoff_delay(attempt, self.base_delay, self.max_delay);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// One model tier: an `awful_aj` configuration plus the chat template it answers with.
pub struct AwfulAsk {
    config: AwfulJadeConfig,
    template: ChatTemplate,
    template_name: String,
}

impl AwfulAsk {
    /// Load the tier's config (defaults to `config.yaml` in the awful_aj
    /// config directory) and its named template.
    #[instrument(level = "info")]
    pub async fn load(config_path: Option<&str>, template_name: &str) -> Result<Self, AskError> {
        let config_path = match config_path {
            Some(p) => p.to_string(),
            None => {
                let dir = config_dir().map_err(|e| AskError::Config(e.to_string()))?;
                dir.join("config.yaml").to_string_lossy().into_owned()
            }
        };
        let config = awful_aj::config::load_config(&config_path)
            .map_err(|e| AskError::Config(format!("{config_path}: {e}")))?;
        let template = awful_aj::template::load_template(template_name)
            .await
            .map_err(|e| AskError::Config(format!("template {template_name}: {e}")))?;
        info!(%config_path, template = template_name, "Loaded model tier");

        Ok(Self {
            config,
            template,
            template_name: template_name.to_string(),
        })
    }
}

impl fmt::Debug for AwfulAsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulAsk")
            .field("template", &self.template_name)
            .finish()
    }
}

#[async_trait(?Send)]
impl AskAsync for AwfulAsk {
    #[instrument(level = "info", skip_all, fields(template = %self.template_name))]
    async fn ask(&self, text: &str) -> Result<String, AskError> {
        let t0 = Instant::now();
        let res = ask(&self.config, text.to_string(), &self.template, None, None).await;
        let dt = t0.elapsed();

        match res {
            Ok(reply) => {
                info!(elapsed_ms = dt.as_millis() as u64, "API call succeeded");
                Ok(reply)
            }
            Err(e) => {
                warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed");
                Err(AskError::Api(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted model: pops one reply per call, repeating the last one when exhausted.
    pub struct ScriptedAsk {
        replies: RefCell<VecDeque<Result<String, AskError>>>,
        pub prompts: RefCell<Vec<String>>,
    }

    impl ScriptedAsk {
        pub fn new(replies: Vec<Result<String, AskError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                prompts: RefCell::new(Vec::new()),
            }
        }

        pub fn always(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string())])
        }

        pub fn calls(&self) -> usize {
            self.prompts.borrow().len()
        }
    }

    #[async_trait(?Send)]
    impl AskAsync for ScriptedAsk {
        async fn ask(&self, text: &str) -> Result<String, AskError> {
            self.prompts.borrow_mut().push(text.to_string());
            let mut replies = self.replies.borrow_mut();
            if replies.len() > 1 {
                replies.pop_front().unwrap_or_else(|| Err(AskError::Api("empty script".into())))
            } else {
                replies
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(AskError::Api("empty script".into())))
            }
        }
    }

    #[async_trait(?Send)]
    impl<T: AskAsync> AskAsync for std::rc::Rc<T> {
        async fn ask(&self, text: &str) -> Result<String, AskError> {
            (**self).ask(text).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedAsk;
    use super::*;

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let inner = ScriptedAsk::new(vec![
            Err(AskError::Api("502".into())),
            Err(AskError::Api("rate limited".into())),
            Ok("VERDICT: INCLUDE".into()),
        ]);
        let api = RetryAsk::new(inner, 3, StdDuration::ZERO);
        assert_eq!(api.ask("q").await.unwrap(), "VERDICT: INCLUDE");
        assert_eq!(api.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let inner = ScriptedAsk::new(vec![Err(AskError::Api("down".into()))]);
        let api = RetryAsk::new(inner, 2, StdDuration::ZERO);
        assert!(matches!(api.ask("q").await, Err(AskError::Api(_))));
        assert_eq!(api.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_config_errors() {
        let inner = ScriptedAsk::new(vec![Err(AskError::Config("no api key".into()))]);
        let api = RetryAsk::new(inner, 5, StdDuration::ZERO);
        assert!(api.ask("q").await.is_err());
        assert_eq!(api.inner.calls(), 1);
    }
}
