//! Grounded answer synthesis with citation validation.
//!
//! The [`Synthesizer`] builds a bounded context window from retrieved hits
//! (score order, truncated to the configured character budget), asks the
//! generation capability to answer only from that context citing sources by
//! bracketed index, and parses the response into an [`Answer`]. Citations
//! are validated against the chunk ids actually supplied: an index the
//! model invented is dropped with a warning, never surfaced as a hard
//! failure. An empty hit sequence short-circuits to a no-grounding answer
//! without calling the external model.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::PipelineError;
use crate::models::{Answer, AnswerStatus, RetrievalHit, SourceType};

/// Trait for generation backends.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// A no-op provider that always returns errors.
pub struct DisabledGenerationProvider;

#[async_trait]
impl GenerationProvider for DisabledGenerationProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

const SYSTEM_PROMPT: &str = "You are a financial research assistant with expertise in \
analyzing financial documents, SEC filings, and market data.";

/// Generation provider for OpenAI-compatible chat-completion endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set. Uses the
/// same retry contract as the embedding provider: 429/5xx/network errors
/// back off exponentially, other 4xx fail immediately.
pub struct OpenAiGenerationProvider {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGenerationProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGenerationProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.1,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying generation request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("message"))
                            .and_then(|m| m.get("content"))
                            .and_then(|c| c.as_str())
                            .ok_or_else(|| {
                                anyhow::anyhow!("invalid completion response: missing content")
                            })?;
                        return Ok(content.to_string());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("completion API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("completion API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("generation failed after retries")))
    }
}

/// Create the appropriate [`GenerationProvider`] based on configuration.
pub fn create_generation_provider(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerationProvider)),
        "openai" => Ok(Arc::new(OpenAiGenerationProvider::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct Synthesizer {
    provider: Arc<dyn GenerationProvider>,
    config: GenerationConfig,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: GenerationConfig) -> Self {
        Self { provider, config }
    }

    /// Synthesize a grounded answer from the retrieved hits.
    ///
    /// # Errors
    ///
    /// [`PipelineError::GenerationUnavailable`] after provider retry
    /// exhaustion. An empty `hits` sequence is not an error: it produces a
    /// no-grounding answer without an external call.
    pub async fn synthesize(
        &self,
        query: &str,
        hits: &[RetrievalHit],
    ) -> std::result::Result<Answer, PipelineError> {
        if hits.is_empty() {
            return Ok(Answer::no_grounding());
        }

        let (context, included) = build_context(hits, self.config.max_context_chars);
        let prompt = format!(
            "Answer the following query based ONLY on the provided context information. \
             Cite the sources that support each claim using their bracketed index, e.g. [1]. \
             If the context doesn't contain the information needed to answer the query, say \
             \"I don't have enough information to answer this question\" and suggest what \
             else might be needed.\n\nCONTEXT:\n{context}\nQUERY: {query}\n\nANSWER:"
        );

        let raw = self
            .provider
            .generate(&prompt)
            .await
            .map_err(|e| PipelineError::GenerationUnavailable(e.to_string()))?;

        let citations = validate_citations(&raw, &included);
        let confidence = confidence_from(&citations, hits);

        Ok(Answer {
            text: raw.trim().to_string(),
            citations,
            confidence,
            status: AnswerStatus::Grounded,
        })
    }
}

/// Assemble the context window: hits in score order, each under a numbered
/// source header, truncated to the character budget. Returns the context
/// text and the chunk ids included, in citation-index order.
fn build_context(hits: &[RetrievalHit], budget_chars: usize) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut included = Vec::new();

    for (i, hit) in hits.iter().enumerate() {
        let header = source_header(hit);
        let block = format!("[{}] {}\n{}\n\n", i + 1, header, hit.text);

        if context.len() + block.len() > budget_chars {
            if context.is_empty() {
                // A single oversized chunk still yields some grounding.
                let room = budget_chars.saturating_sub(header.len() + 16).max(64);
                let end = floor_char_boundary(&hit.text, room);
                context = format!("[1] {}\n{}\n\n", header, &hit.text[..end]);
                included.push(hit.chunk_id.clone());
            }
            break;
        }

        context.push_str(&block);
        included.push(hit.chunk_id.clone());
    }

    (context, included)
}

/// Human-readable source label for a context block.
fn source_header(hit: &RetrievalHit) -> String {
    let date = hit.metadata.published_at.format("%Y-%m-%d");
    match hit.metadata.source_type {
        SourceType::Filing => match &hit.metadata.filing_type {
            Some(ft) => format!("{ft} Filing ({date})"),
            None => format!("Filing ({date})"),
        },
        SourceType::News => format!("News Article ({date})"),
        SourceType::Upload => match &hit.metadata.title {
            Some(t) => format!("Uploaded Document: {t}"),
            None => "Uploaded Document".to_string(),
        },
    }
}

static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Map bracketed citation indexes in the response back to chunk ids.
/// Indexes outside the supplied range are hallucinations: dropped and
/// logged, never propagated.
fn validate_citations(text: &str, included: &[String]) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for cap in CITATION.captures_iter(text) {
        let n: usize = match cap[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        match n.checked_sub(1).and_then(|i| included.get(i)) {
            Some(chunk_id) => {
                if !citations.iter().any(|c| c == chunk_id) {
                    citations.push(chunk_id.clone());
                }
            }
            None => {
                warn!(index = n, "hallucinated citation dropped");
            }
        }
    }
    citations
}

/// Mean retrieval score of the cited chunks, clamped to `[0, 1]`.
fn confidence_from(citations: &[String], hits: &[RetrievalHit]) -> Option<f64> {
    if citations.is_empty() {
        return None;
    }
    let scores: Vec<f64> = citations
        .iter()
        .filter_map(|id| hits.iter().find(|h| &h.chunk_id == id).map(|h| h.score))
        .collect();
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    Some(mean.clamp(0.0, 1.0))
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use chrono::{TimeZone, Utc};

    struct ScriptedProvider {
        response: String,
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl GenerationProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            bail!("model down")
        }
    }

    fn hit(chunk: &str, text: &str, score: f64) -> RetrievalHit {
        RetrievalHit {
            chunk_id: chunk.to_string(),
            document_id: "d1".to_string(),
            score,
            text: text.to_string(),
            metadata: ChunkMetadata {
                ticker: Some("AAPL".to_string()),
                source_type: SourceType::Filing,
                filing_type: Some("10-Q".to_string()),
                published_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                title: None,
                section: None,
                page: None,
            },
        }
    }

    fn synthesizer(response: &str) -> Synthesizer {
        Synthesizer::new(
            Arc::new(ScriptedProvider {
                response: response.to_string(),
            }),
            GenerationConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_hits_short_circuit_without_model_call() {
        let s = Synthesizer::new(Arc::new(FailingProvider), GenerationConfig::default());
        let answer = s.synthesize("anything", &[]).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::NoGroundingFound);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn valid_citations_map_to_chunk_ids() {
        let s = synthesizer("Revenue rose [1], margins held [2].");
        let hits = vec![hit("c1", "revenue text", 0.9), hit("c2", "margin text", 0.8)];
        let answer = s.synthesize("q", &hits).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Grounded);
        assert_eq!(answer.citations, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[tokio::test]
    async fn invented_citation_is_dropped_not_fatal() {
        let s = synthesizer("Strong quarter [1], see also [9].");
        let hits = vec![hit("c1", "text", 0.9)];
        let answer = s.synthesize("q", &hits).await.unwrap();
        assert_eq!(answer.citations, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn repeated_citations_dedupe_in_order() {
        let s = synthesizer("[2] then [1] then [2] again.");
        let hits = vec![hit("c1", "a", 0.9), hit("c2", "b", 0.8)];
        let answer = s.synthesize("q", &hits).await.unwrap();
        assert_eq!(answer.citations, vec!["c2".to_string(), "c1".to_string()]);
    }

    #[tokio::test]
    async fn provider_failure_is_generation_unavailable() {
        let s = Synthesizer::new(Arc::new(FailingProvider), GenerationConfig::default());
        let err = s.synthesize("q", &[hit("c1", "t", 0.5)]).await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable(_)));
    }

    #[test]
    fn context_respects_budget() {
        let hits = vec![
            hit("c1", &"a".repeat(300), 0.9),
            hit("c2", &"b".repeat(300), 0.8),
            hit("c3", &"c".repeat(300), 0.7),
        ];
        let (context, included) = build_context(&hits, 700);
        assert!(context.len() <= 700);
        assert_eq!(included, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn oversized_first_chunk_is_truncated_not_dropped() {
        let hits = vec![hit("c1", &"x".repeat(5000), 0.9)];
        let (context, included) = build_context(&hits, 400);
        assert!(!context.is_empty());
        assert!(context.len() <= 440);
        assert_eq!(included, vec!["c1".to_string()]);
    }

    #[test]
    fn context_blocks_are_index_labelled() {
        let hits = vec![hit("c1", "first", 0.9), hit("c2", "second", 0.8)];
        let (context, _) = build_context(&hits, 10_000);
        assert!(context.contains("[1] 10-Q Filing"));
        assert!(context.contains("[2] 10-Q Filing"));
    }
}
