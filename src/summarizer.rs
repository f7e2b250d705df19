//! Structured article summaries from the larger model tier.
//!
//! The model is asked for a JSON object with `project_name`, `architect`,
//! `tags` and `abstract`. Replies cut off mid-JSON are re-asked once, the same
//! way long news summaries are handled.

use chrono::NaiveDate;
use itertools::Itertools;
use tracing::{info, instrument, warn};

use crate::api::AskAsync;
use crate::error::SummarizationError;
use crate::models::{ArticleSummary, FetchedArticle};
use crate::utils::{looks_truncated, strip_code_fence, truncate_for_log};

/// Characters of body text sent to the model.
const EXCERPT_CHARS: usize = 4000;

pub struct Summarizer {
    model: Box<dyn AskAsync>,
}

impl Summarizer {
    pub fn new(model: Box<dyn AskAsync>) -> Self {
        Self { model }
    }

    /// Summarize `article`. `today` anchors temporal phrasing in the abstract.
    #[instrument(level = "info", skip_all, fields(url = %article.url))]
    pub async fn summarize(
        &self,
        article: &FetchedArticle,
        today: NaiveDate,
    ) -> Result<ArticleSummary, SummarizationError> {
        let question = build_question(article, today);

        let reply = self.model.ask(&question).await?;
        let mut parsed = parse_summary(&reply);

        // If the parse failed due to EOF (truncation), re-ask ONCE
        if let Err(ref e) = parsed {
            if looks_truncated(e) {
                warn!(error = %e, "EOF while parsing summary; re-asking once");
                match self.model.ask(&question).await {
                    Ok(r2) => parsed = parse_summary(&r2),
                    Err(e2) => warn!(error = %e2, "Re-ask failed"),
                }
            }
        }

        let mut summary = parsed.map_err(|e| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&reply, 300),
                "Model returned non-conforming JSON"
            );
            SummarizationError::Malformed(e.to_string())
        })?;

        summary.tags = normalize_tags(summary.tags);
        summary.source_url = article.url.clone();
        validate(&summary)?;

        info!(project = %summary.project_name, tags = ?summary.tags, "Summarized article");
        Ok(summary)
    }
}

/// User message for the summary model.
pub fn build_question(article: &FetchedArticle, today: NaiveDate) -> String {
    format!(
        "Today's date is {today}.\n\
         Summarize this architecture article for a professional digest.\n\n\
         Title: {}\n\
         Source: {}\n\
         Text: {}\n\n\
         Respond with ONLY a JSON object with these keys:\n\
         \"project_name\": the project, e.g. \"Cloud 11 Office Complex\"\n\
         \"architect\": the architect or bureau, e.g. \"Snøhetta\"\n\
         \"tags\": one to three lowercase tags naming the realm of the project \
         (landscapearchitecture, urbanism, culture, ...), no spaces or hyphens\n\
         \"abstract\": exactly two sentences in British English; first what the \
         project is (who designed what, where), then what makes it notable",
        article.title,
        article.url,
        article.text_excerpt(EXCERPT_CHARS),
    )
}

pub fn parse_summary(reply: &str) -> Result<ArticleSummary, serde_json::Error> {
    serde_json::from_str::<ArticleSummary>(strip_code_fence(reply))
}

/// Lowercase, drop separators and duplicates, keep model order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| {
            t.chars()
                .filter(|c| !c.is_whitespace() && *c != '-' && *c != '#')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .unique()
        .collect()
}

fn validate(summary: &ArticleSummary) -> Result<(), SummarizationError> {
    if summary.project_name.trim().is_empty() {
        return Err(SummarizationError::MissingField("project_name"));
    }
    if summary.architect.trim().is_empty() {
        return Err(SummarizationError::MissingField("architect"));
    }
    if summary.tags.is_empty() {
        return Err(SummarizationError::MissingField("tags"));
    }
    if summary.abstract_text.trim().is_empty() {
        return Err(SummarizationError::MissingField("abstract"));
    }
    Ok(())
}
