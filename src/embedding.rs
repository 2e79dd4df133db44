//! Embedding capability and content-hash cache.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbeddingProvider`]** — calls an OpenAI-compatible embeddings
//!   endpoint with batching, retry, and backoff.
//!
//! [`Embedder`] wraps a provider with a content-hash keyed cache so
//! identical text is never re-embedded, and batches cache misses up to the
//! configured batch size to bound external request count.
//!
//! # Retry Strategy
//!
//! Transient errors back off exponentially:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! After retry exhaustion the owning operation fails with
//! [`PipelineError::EmbeddingUnavailable`] — a missing embedding is never
//! silently skipped, since it would corrupt retrieval recall.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A no-op provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Embedding provider for OpenAI-compatible `POST /v1/embeddings` endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiEmbeddingProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding request");
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
                        return parse_embeddings_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("embeddings API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embeddings API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

/// Extract the `data[].embedding` arrays, in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiEmbeddingProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Caching, batching front-end over an [`EmbeddingProvider`].
///
/// The cache is keyed by a SHA-256 hash of the text, so identical text is
/// embedded at most once per process. Concurrent writers to the same key
/// may race, but both compute the same vector for the same input, so
/// last-write-wins is fine.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Arc<Vec<f32>>>>,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            batch_size: batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Cache key for a text.
    pub fn content_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Embed a batch of texts, serving repeats from the cache and batching
    /// cache misses up to the configured batch size per external call.
    ///
    /// # Errors
    ///
    /// [`PipelineError::EmbeddingUnavailable`] after provider retry
    /// exhaustion.
    pub async fn embed_texts(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, PipelineError> {
        let keys: Vec<String> = texts.iter().map(|t| Self::content_hash(t)).collect();

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            for (i, key) in keys.iter().enumerate() {
                match cache.get(key) {
                    Some(v) => out[i] = Some(v.as_ref().clone()),
                    None => misses.push(i),
                }
            }
        }
        if !misses.is_empty() {
            debug!(total = texts.len(), misses = misses.len(), "embedding cache misses");
        }

        // De-duplicate identical texts within the batch so each distinct
        // text is sent once.
        let mut distinct: Vec<usize> = Vec::new();
        let mut first_for_key: HashMap<&str, usize> = HashMap::new();
        for &i in &misses {
            if !first_for_key.contains_key(keys[i].as_str()) {
                first_for_key.insert(keys[i].as_str(), i);
                distinct.push(i);
            }
        }

        for batch in distinct.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self
                .provider
                .embed(&batch_texts)
                .await
                .map_err(|e| PipelineError::EmbeddingUnavailable(e.to_string()))?;
            if vectors.len() != batch_texts.len() {
                return Err(PipelineError::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch_texts.len()
                )));
            }

            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            for (&i, vector) in batch.iter().zip(vectors) {
                cache.insert(keys[i].clone(), Arc::new(vector));
            }
        }

        // Second pass: every miss resolves through the cache, including
        // duplicates of a distinct text embedded above.
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        for i in misses {
            let v = cache.get(&keys[i]).ok_or_else(|| {
                PipelineError::EmbeddingUnavailable("embedding missing after fetch".to_string())
            })?;
            out[i] = Some(v.as_ref().clone());
        }

        Ok(out.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, PipelineError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_texts(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| PipelineError::EmbeddingUnavailable("empty embedding response".into()))
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
