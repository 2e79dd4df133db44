//! Financial NLP extraction: entities, metrics, and sentiment.
//!
//! The three passes are independent; each can run and fail on its own
//! without blocking the others. [`Extractor`] is the capability interface:
//! implementations are selected at configuration time, so a model-backed
//! extractor can replace the bundled heuristic one without touching
//! callers.
//!
//! Results are cached per `(target id, extractor version)` so re-running
//! analysis without re-ingestion is cheap and idempotent.

pub mod entities;
pub mod metrics;
pub mod sentiment;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};

use crate::config::ExtractionConfig;
use crate::models::ExtractionResult;

/// Bumped whenever extraction heuristics change, invalidating cached
/// results.
pub const EXTRACTOR_VERSION: u32 = 1;

/// Capability interface for extraction implementations.
pub trait Extractor: Send + Sync {
    /// Version tag mixed into cache keys.
    fn version(&self) -> u32;
    /// Run all three passes over a text.
    fn extract(&self, text: &str) -> ExtractionResult;
}

/// The bundled pattern- and lexicon-based extractor.
pub struct HeuristicExtractor {
    metric_window_chars: usize,
}

impl HeuristicExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            metric_window_chars: config.metric_window_chars,
        }
    }
}

impl Extractor for HeuristicExtractor {
    fn version(&self) -> u32 {
        EXTRACTOR_VERSION
    }

    fn extract(&self, text: &str) -> ExtractionResult {
        ExtractionResult {
            entities: entities::extract_entities(text),
            metrics: metrics::extract_metrics(text, self.metric_window_chars),
            sentiment_score: sentiment::score_text(text),
        }
    }
}

/// Create the configured [`Extractor`] implementation.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.extractor.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicExtractor::new(config))),
        other => bail!("Unknown extractor: {}", other),
    }
}

/// Cache of extraction results keyed by `(target id, extractor version)`.
///
/// Extraction is a pure function of its input, so concurrent writers to
/// the same key converge on the same value and last-write-wins is safe.
pub struct ExtractionCache {
    entries: RwLock<HashMap<(String, u32), Arc<ExtractionResult>>>,
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the cached result for `id`, or run the extractor and cache.
    pub fn get_or_extract(
        &self,
        id: &str,
        text: &str,
        extractor: &dyn Extractor,
    ) -> Arc<ExtractionResult> {
        let key = (id.to_string(), extractor.version());
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = entries.get(&key) {
                return cached.clone();
            }
        }

        let result = Arc::new(extractor.extract(text));
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(key).or_insert_with(|| result.clone()).clone()
    }

    /// Drop cached results for a document and its chunks (chunk ids are
    /// prefixed by the document id), e.g. after re-ingestion.
    pub fn invalidate(&self, id: &str) {
        let prefix = format!("{id}:");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(key_id, _), _| key_id != id && !key_id.starts_with(&prefix));
    }
}

impl Default for ExtractionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtractor {
        runs: AtomicUsize,
    }

    impl Extractor for CountingExtractor {
        fn version(&self) -> u32 {
            7
        }
        fn extract(&self, text: &str) -> ExtractionResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ExtractionResult {
                entities: Vec::new(),
                metrics: Default::default(),
                sentiment_score: text.len() as f64 % 1.0,
            }
        }
    }

    #[test]
    fn cache_runs_extractor_once_per_id() {
        let cache = ExtractionCache::new();
        let extractor = CountingExtractor {
            runs: AtomicUsize::new(0),
        };

        cache.get_or_extract("doc1", "text", &extractor);
        cache.get_or_extract("doc1", "text", &extractor);
        cache.get_or_extract("doc2", "text", &extractor);
        assert_eq!(extractor.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_rerun() {
        let cache = ExtractionCache::new();
        let extractor = CountingExtractor {
            runs: AtomicUsize::new(0),
        };

        cache.get_or_extract("doc1", "text", &extractor);
        cache.invalidate("doc1");
        cache.get_or_extract("doc1", "text", &extractor);
        assert_eq!(extractor.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn heuristic_extractor_runs_all_passes() {
        let extractor = HeuristicExtractor::new(&ExtractionConfig::default());
        let result = extractor.extract(
            "AAPL reported revenue of $90 billion in Q1 2024, with strong growth of 8%.",
        );
        assert!(!result.entities.is_empty());
        assert!(result.metrics.contains_key("revenue"));
        assert!(result.sentiment_score > 0.0);
        assert!((-1.0..=1.0).contains(&result.sentiment_score));
    }
}
