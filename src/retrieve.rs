//! Query-side retrieval: expansion, vector search, and deduplication.
//!
//! Given a query string and a metadata filter, the [`Retriever`] expands
//! the query with known financial synonyms to improve recall (never
//! discarding the original), embeds it, queries the vector index, collapses
//! near-duplicate hits from rewrites of the same story, and returns the
//! top-k in score order. An empty result is a valid outcome, not an error,
//! and the caller's filter is never widened.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::index::{IndexHit, MetadataFilter, VectorIndex};
use crate::models::RetrievalHit;

/// Built-in abbreviation expansions. Config entries merge over these.
const DEFAULT_EXPANSIONS: &[(&str, &str)] = &[
    ("eps", "earnings per share"),
    ("p/e", "price to earnings ratio"),
    ("yoy", "year over year"),
    ("qoq", "quarter over quarter"),
    ("ebitda", "earnings before interest taxes depreciation and amortization"),
    ("fcf", "free cash flow"),
    ("roe", "return on equity"),
    ("roa", "return on assets"),
    ("capex", "capital expenditures"),
    ("opex", "operating expenses"),
    ("m&a", "mergers and acquisitions"),
    ("cogs", "cost of goods sold"),
];

pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        namespace: String,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            namespace,
            config,
        }
    }

    /// Append expansions for every known abbreviation present in the query.
    /// The original query text is always kept verbatim at the front.
    pub fn expand_query(&self, query: &str) -> String {
        let lower = query.to_lowercase();
        let mut expanded = query.to_string();

        let configured = self
            .config
            .expansions
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()));
        let defaults = DEFAULT_EXPANSIONS
            .iter()
            .filter(|(term, _)| !self.config.expansions.keys().any(|k| k.eq_ignore_ascii_case(term)))
            .map(|(term, exp)| ((*term).to_string(), *exp));

        for (term, expansion) in configured.chain(defaults) {
            if contains_term(&lower, &term) && !lower.contains(&expansion.to_lowercase()) {
                expanded.push(' ');
                expanded.push_str(expansion);
            }
        }
        expanded
    }

    /// Retrieve up to `k` deduplicated hits for the query.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::EmbeddingUnavailable`] when the query cannot be
    ///   embedded.
    /// - [`PipelineError::IndexUnavailable`] when the index query fails.
    pub async fn retrieve(
        &self,
        query: &str,
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let expanded = self.expand_query(query);
        if expanded != query {
            debug!(%expanded, "expanded query");
        }
        let vector = self.embedder.embed_query(&expanded).await?;

        let candidate_k = self.config.candidate_k.max(k);
        let candidates = self
            .index
            .query(&self.namespace, &vector, candidate_k, filter)
            .await
            .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;

        let mut hits = dedup_hits(candidates, self.config.dedup_window_secs);
        hits.truncate(k);
        Ok(hits)
    }
}

/// Whether `term` occurs in `haystack` with non-alphanumeric neighbours.
/// Both arguments must already be lowercase.
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end >= haystack.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Collapse hits that are near-duplicates of an already kept hit: a
/// different document carrying the same title published within the window.
/// Score order is preserved; the best-scoring copy survives.
fn dedup_hits(candidates: Vec<IndexHit>, window_secs: i64) -> Vec<RetrievalHit> {
    let mut kept: Vec<RetrievalHit> = Vec::new();
    let mut seen_chunks: HashSet<String> = HashSet::new();

    for hit in candidates {
        if !seen_chunks.insert(hit.chunk_id.clone()) {
            continue;
        }

        let is_duplicate = hit.metadata.title.as_deref().is_some_and(|title| {
            kept.iter().any(|k| {
                k.document_id != hit.document_id
                    && k.metadata
                        .title
                        .as_deref()
                        .is_some_and(|t| t.eq_ignore_ascii_case(title))
                    && (k.metadata.published_at - hit.metadata.published_at)
                        .num_seconds()
                        .abs()
                        <= window_secs
            })
        });
        if is_duplicate {
            debug!(chunk_id = %hit.chunk_id, "dropped near-duplicate hit");
            continue;
        }

        kept.push(RetrievalHit {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            score: hit.score,
            text: hit.text,
            metadata: hit.metadata,
        });
    }

    kept
}
