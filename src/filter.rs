//! Relevance filter run before the costlier summary call.
//!
//! The filter keeps significant architecture (public, cultural, institutional,
//! large-scale work and notable firms) and drops interiors, private homes and
//! product design. It either asks the cheap model tier or applies an injected
//! decision function.

use tracing::{debug, info, instrument, warn};

use crate::api::AskAsync;
use crate::models::{FetchedArticle, FilterVerdict};

/// Characters of body text sent along with the title.
const EXCERPT_CHARS: usize = 1000;

type DecisionFn = Box<dyn Fn(&FetchedArticle) -> FilterVerdict>;

enum Classifier {
    Model(Box<dyn AskAsync>),
    Decision(DecisionFn),
    PassThrough,
}

pub struct AiFilter {
    classifier: Classifier,
}

impl AiFilter {
    /// Classify with a model. Wrap it in [`crate::api::RetryAsk`] to bound retries.
    pub fn model(model: Box<dyn AskAsync>) -> Self {
        Self {
            classifier: Classifier::Model(model),
        }
    }

    /// Classify with a local rule instead of a model.
    pub fn decision<F>(f: F) -> Self
    where
        F: Fn(&FetchedArticle) -> FilterVerdict + 'static,
    {
        Self {
            classifier: Classifier::Decision(Box::new(f)),
        }
    }

    /// Accept everything (`--no-filter`).
    pub fn pass_through() -> Self {
        Self {
            classifier: Classifier::PassThrough,
        }
    }

    /// Decide whether `article` belongs in the digest.
    ///
    /// Never fails: a model that stays unreachable after its retries yields
    /// [`FilterVerdict::unavailable`].
    #[instrument(level = "info", skip_all, fields(url = %article.url))]
    pub async fn classify(&self, article: &FetchedArticle, source_name: &str) -> FilterVerdict {
        let verdict = match &self.classifier {
            Classifier::PassThrough => FilterVerdict::include("filter disabled"),
            Classifier::Decision(f) => f(article),
            Classifier::Model(model) => {
                let question = build_question(article, source_name);
                match model.ask(&question).await {
                    Ok(reply) => {
                        debug!(reply = %crate::utils::truncate_for_log(&reply, 200), "Filter reply");
                        parse_filter_response(&reply)
                    }
                    Err(e) => {
                        warn!(error = %e, "Filter model unavailable; soft-rejecting");
                        FilterVerdict::unavailable()
                    }
                }
            }
        };
        info!(
            include = verdict.is_relevant,
            reason = %verdict.reason,
            "Filter verdict"
        );
        verdict
    }
}

/// User message for the filter model.
pub fn build_question(article: &FetchedArticle, source_name: &str) -> String {
    format!(
        "Classify this architecture article:\n\n\
         Title: {}\n\n\
         Description: {}\n\n\
         Source: {} ({})\n\n\
         Respond with exactly two lines in this format:\n\
         VERDICT: INCLUDE or EXCLUDE\n\
         REASON: One brief sentence explaining why",
        article.title,
        article.text_excerpt(EXCERPT_CHARS),
        source_name,
        article.url,
    )
}

/// Parse `VERDICT:` / `REASON:` lines.
///
/// A reply without a recognisable verdict line is treated as INCLUDE so a
/// chatty model does not silently drop articles.
pub fn parse_filter_response(reply: &str) -> FilterVerdict {
    let mut include = true;
    let mut reason = String::new();

    for line in reply.lines().map(|l| l.trim().trim_start_matches(['*', '-', ' '])) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('*').trim();
        match key.trim().to_ascii_uppercase().trim_matches('*') {
            "VERDICT" => include = value.eq_ignore_ascii_case("INCLUDE"),
            "REASON" => reason = value.to_string(),
            _ => {}
        }
    }

    if include {
        FilterVerdict::include(reason)
    } else {
        FilterVerdict::exclude(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryAsk;
    use crate::api::testing::ScriptedAsk;
    use crate::error::AskError;
    use std::time::Duration;

    fn article() -> FetchedArticle {
        FetchedArticle {
            url: "https://www.domusweb.it/en/news/a.html".into(),
            title: "A new concert hall in Oslo".into(),
            body: "<p>The hall seats 1,800.</p>".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_include() {
        let v = parse_filter_response("VERDICT: INCLUDE\nREASON: Major cultural center by Snohetta");
        assert!(v.is_relevant);
        assert_eq!(v.reason, "Major cultural center by Snohetta");
    }

    #[test]
    fn test_parse_exclude_with_markdown_noise() {
        let v = parse_filter_response("**VERDICT:** exclude\n**REASON:** Private residence interior");
        assert!(!v.is_relevant);
        assert_eq!(v.reason, "Private residence interior");
    }

    #[test]
    fn test_parse_without_verdict_defaults_to_include() {
        let v = parse_filter_response("I think this is about a museum.");
        assert!(v.is_relevant);
        assert!(v.reason.is_empty());
    }

    #[test]
    fn test_question_carries_title_excerpt_and_url() {
        let q = build_question(&article(), "Domus");
        assert!(q.contains("Title: A new concert hall in Oslo"));
        assert!(q.contains("The hall seats 1,800."));
        assert!(q.contains("https://www.domusweb.it/en/news/a.html"));
    }

    #[tokio::test]
    async fn test_model_failure_is_unavailable() {
        let model = ScriptedAsk::new(vec![Err(AskError::Api("timeout".into()))]);
        let filter = AiFilter::model(Box::new(RetryAsk::new(model, 2, Duration::ZERO)));
        let v = filter.classify(&article(), "Domus").await;
        assert!(v.is_unavailable());
    }

    #[tokio::test]
    async fn test_decision_function_is_used() {
        let filter = AiFilter::decision(|a| {
            if a.title.contains("villa") {
                FilterVerdict::exclude("private residence")
            } else {
                FilterVerdict::include("public building")
            }
        });
        assert!(filter.classify(&article(), "Domus").await.is_relevant);
        let villa = FetchedArticle {
            title: "A villa by the sea".into(),
            ..article()
        };
        assert!(!filter.classify(&villa, "Domus").await.is_relevant);
    }

    #[tokio::test]
    async fn test_pass_through() {
        let v = AiFilter::pass_through().classify(&article(), "Domus").await;
        assert!(v.is_relevant);
    }
}
