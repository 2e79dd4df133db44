//! Vector index capability contract and in-memory implementation.
//!
//! [`VectorIndex`] is the narrow interface the pipeline requires of any
//! vector store backend: idempotent upserts keyed by chunk id,
//! nearest-neighbour queries filtered by metadata predicates, and deletes.
//! Every operation is scoped to a namespace; results never cross
//! namespaces.
//!
//! [`InMemoryIndex`] is the bundled backend: brute-force cosine similarity
//! over all stored vectors, suitable for tests and small corpora.
//! Similarity ties break by more recent `published_at`, then by chunk id,
//! so orderings are deterministic.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{ChunkMetadata, SourceType};

/// Conjunction of exact-match and range predicates over chunk metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub ticker: Option<String>,
    pub source_type: Option<SourceType>,
    pub filing_type: Option<String>,
    pub published_after: Option<DateTime<Utc>>,
    pub published_before: Option<DateTime<Utc>>,
}

impl MetadataFilter {
    pub fn for_ticker(ticker: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(ref t) = self.ticker {
            if meta.ticker.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(st) = self.source_type {
            if meta.source_type != st {
                return false;
            }
        }
        if let Some(ref ft) = self.filing_type {
            if meta.filing_type.as_deref() != Some(ft.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.published_after {
            if meta.published_at < after {
                return false;
            }
        }
        if let Some(before) = self.published_before {
            if meta.published_at > before {
                return false;
            }
        }
        true
    }
}

/// A chunk record as stored in the index: vector plus the metadata needed
/// for filtering, and the text needed to ground synthesis.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A scored query result.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Capability contract required of the vector store backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a chunk record. Idempotent: re-upserting the same
    /// chunk id replaces its vector and metadata.
    async fn upsert(&self, namespace: &str, chunk: IndexedChunk) -> Result<()>;

    /// Return up to `k` hits ordered by descending cosine similarity,
    /// restricted to records matching `filter`.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>>;

    async fn delete(&self, namespace: &str, chunk_id: &str) -> Result<()>;

    async fn delete_by_document(&self, namespace: &str, document_id: &str) -> Result<()>;
}

/// In-memory [`VectorIndex`] with brute-force cosine search.
///
/// Storage is partitioned by namespace first, so a query can only ever see
/// its own namespace's records. The vector dimension is fixed index-wide by
/// the first upsert (or the configured dimension); mismatched vectors are
/// rejected.
pub struct InMemoryIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, IndexedChunk>>>,
    dims: RwLock<Option<usize>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            dims: RwLock::new(None),
        }
    }

    /// Create an index that only accepts vectors of `dims` dimensions.
    pub fn with_dims(dims: usize) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            dims: RwLock::new(Some(dims)),
        }
    }

    fn check_dims(&self, len: usize) -> Result<()> {
        let mut dims = self.dims.write().unwrap_or_else(|e| e.into_inner());
        match *dims {
            Some(d) if d != len => bail!("vector dimension {} does not match index dimension {}", len, d),
            Some(_) => Ok(()),
            None => {
                *dims = Some(len);
                Ok(())
            }
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, namespace: &str, chunk: IndexedChunk) -> Result<()> {
        if chunk.vector.is_empty() {
            bail!("refusing to index chunk {} with empty vector", chunk.chunk_id);
        }
        self.check_dims(chunk.vector.len())?;
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(chunk.chunk_id.clone(), chunk);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>> {
        let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        let records = match namespaces.get(namespace) {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<IndexHit> = records
            .values()
            .filter(|c| filter.matches(&c.metadata))
            .map(|c| IndexHit {
                chunk_id: c.chunk_id.clone(),
                document_id: c.document_id.clone(),
                score: cosine_similarity(vector, &c.vector) as f64,
                text: c.text.clone(),
                metadata: c.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.metadata.published_at.cmp(&a.metadata.published_at))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, chunk_id: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        if let Some(records) = namespaces.get_mut(namespace) {
            records.remove(chunk_id);
        }
        Ok(())
    }

    async fn delete_by_document(&self, namespace: &str, document_id: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        if let Some(records) = namespaces.get_mut(namespace) {
            records.retain(|_, c| c.document_id != document_id);
        }
        Ok(())
    }
}
