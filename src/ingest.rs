//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a document: normalization → chunking →
//! embedding → index upserts → document store. Documents in a batch are
//! independent units of atomicity: one malformed document is reported and
//! the rest of the batch continues.
//!
//! Re-ingesting the same source id supersedes the previous version: its
//! chunks are deleted and replaced, never mutated. A per-document lock
//! sequences deletion after any in-flight upserts for the same document,
//! so a concurrent re-ingest cannot resurrect deleted chunks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::index::{IndexedChunk, VectorIndex};
use crate::models::{
    BatchOutcome, ChunkMetadata, Document, IngestFailure, IngestReceipt, SourceDocument,
};
use crate::normalize;
use crate::store::DocumentStore;

/// Deterministic document id derived from the source id, so re-ingestion
/// addresses the same document (and the same chunk ids).
pub fn document_id_for(source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"doc:");
    hasher.update(source_id.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

pub struct IngestPipeline {
    chunking: ChunkingConfig,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    namespace: String,
    doc_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestPipeline {
    pub fn new(
        chunking: ChunkingConfig,
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
        namespace: String,
    ) -> Self {
        Self {
            chunking,
            embedder,
            index,
            store,
            namespace,
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.doc_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Ingest a single document.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::UnsupportedFormat`] / [`PipelineError::EmptyContent`]
    ///   from normalization; nothing is stored or indexed in that case.
    /// - [`PipelineError::EmbeddingUnavailable`] after embedding retry
    ///   exhaustion; the document is not indexed partially.
    /// - [`PipelineError::IndexUnavailable`] / [`PipelineError::StoreUnavailable`]
    ///   from the backing capabilities.
    pub async fn ingest(&self, src: SourceDocument) -> Result<IngestReceipt> {
        let normalized = normalize::normalize(&src.bytes, src.format)?;
        let document_id = document_id_for(&src.source_id);

        let mut extra = BTreeMap::new();
        extra.insert("source_id".to_string(), src.source_id.clone());

        let doc = Document {
            id: document_id.clone(),
            ticker: src.ticker.clone().or(normalized.ticker),
            source_type: src.source_type,
            filing_type: src.filing_type.clone(),
            published_at: src
                .published_at
                .or(normalized.published_at)
                .unwrap_or_else(Utc::now),
            title: normalized.title,
            text: normalized.text,
            degraded: normalized.degraded,
            extra,
        };

        let mut chunks = chunk_text(
            &doc.id,
            &doc.text,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        );
        if chunks.is_empty() {
            return Err(PipelineError::EmptyContent);
        }

        // Embeddings join back to chunks by position, which is chunk-id
        // order; the provider may batch and parallelize internally.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = vector;
        }

        let meta = ChunkMetadata::from_document(&doc);
        let chunk_count = chunks.len();
        let degraded = doc.degraded;

        // Barrier: all index writes for one document id happen under its
        // lock, so supersede-deletes never interleave with upserts.
        let lock = self.lock_for(&document_id);
        let _guard = lock.lock().await;

        self.index
            .delete_by_document(&self.namespace, &document_id)
            .await
            .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;

        for chunk in chunks {
            self.index
                .upsert(
                    &self.namespace,
                    IndexedChunk {
                        chunk_id: chunk.id,
                        document_id: document_id.clone(),
                        vector: chunk.embedding,
                        text: chunk.text,
                        metadata: meta.clone(),
                    },
                )
                .await
                .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;
        }

        self.store
            .put(doc)
            .await
            .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

        info!(%document_id, chunk_count, degraded, "ingested document");
        Ok(IngestReceipt {
            document_id,
            chunk_count,
            degraded,
        })
    }

    /// Ingest a batch of independent documents concurrently. A failed
    /// document is recorded and does not abort the rest.
    pub async fn ingest_batch(self: Arc<Self>, docs: Vec<SourceDocument>) -> BatchOutcome {
        let mut set = JoinSet::new();
        for src in docs {
            let pipeline = Arc::clone(&self);
            set.spawn(async move {
                let source_id = src.source_id.clone();
                (source_id, pipeline.ingest(src).await)
            });
        }

        let mut outcome = BatchOutcome::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(receipt))) => outcome.succeeded.push(receipt),
                Ok((source_id, Err(e))) => {
                    warn!(%source_id, error = %e, "document failed; batch continues");
                    outcome.failed.push(IngestFailure {
                        source_id,
                        error: e.to_string(),
                    });
                }
                Err(join_err) => outcome.failed.push(IngestFailure {
                    source_id: String::new(),
                    error: join_err.to_string(),
                }),
            }
        }

        outcome.succeeded.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        outcome.failed.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        outcome
    }

    /// Remove a document and its chunks from the index and the store.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let lock = self.lock_for(document_id);
        let _guard = lock.lock().await;

        self.index
            .delete_by_document(&self.namespace, document_id)
            .await
            .map_err(|e| PipelineError::IndexUnavailable(e.to_string()))?;
        self.store
            .delete(document_id)
            .await
            .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::index::{InMemoryIndex, MetadataFilter};
    use crate::models::SourceType;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;

    /// Deterministic bag-of-words embedding for tests.
    pub(crate) struct HashEmbedding;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedding {
        fn model_name(&self) -> &str {
            "hash-test"
        }
        fn dims(&self) -> usize {
            32
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| embed_one(t)).collect())
        }
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 32];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut h = 0usize;
            for b in token.bytes() {
                h = h.wrapping_mul(31).wrapping_add(b as usize);
            }
            v[h % 32] += 1.0;
        }
        v
    }

    fn pipeline() -> (Arc<IngestPipeline>, Arc<InMemoryIndex>, Arc<InMemoryDocumentStore>) {
        let index = Arc::new(InMemoryIndex::new());
        let store = Arc::new(InMemoryDocumentStore::new());
        let embedder = Arc::new(Embedder::new(Arc::new(HashEmbedding), 8));
        let pipeline = Arc::new(IngestPipeline::new(
            ChunkingConfig {
                max_chars: 120,
                overlap_chars: 20,
            },
            embedder,
            index.clone(),
            store.clone(),
            "test".to_string(),
        ));
        (pipeline, index, store)
    }

    fn text_doc(source_id: &str, ticker: &str, body: &str) -> SourceDocument {
        SourceDocument {
            source_id: source_id.to_string(),
            source_type: SourceType::News,
            format: Some(crate::models::DocumentFormat::Text),
            ticker: Some(ticker.to_string()),
            filing_type: None,
            published_at: None,
            bytes: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn ingest_stores_and_indexes() {
        let (pipeline, index, store) = pipeline();
        let receipt = pipeline
            .ingest(text_doc("news-1", "AAPL", "Apple reported strong revenue growth in Q1."))
            .await
            .unwrap();
        assert!(receipt.chunk_count >= 1);

        let doc = store.get(&receipt.document_id).await.unwrap().unwrap();
        assert_eq!(doc.ticker.as_deref(), Some("AAPL"));

        let hits = index
            .query("test", &embed_one("revenue growth"), 5, &MetadataFilter::default())
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn reingest_is_idempotent_on_ids() {
        let (pipeline, _, _) = pipeline();
        let body = "Paragraph one about revenue.\n\nParagraph two about margins.";
        let r1 = pipeline.ingest(text_doc("filing-1", "AAPL", body)).await.unwrap();
        let r2 = pipeline.ingest(text_doc("filing-1", "AAPL", body)).await.unwrap();
        assert_eq!(r1.document_id, r2.document_id);
        assert_eq!(r1.chunk_count, r2.chunk_count);
    }

    #[tokio::test]
    async fn reingest_supersedes_old_chunks() {
        let (pipeline, index, _) = pipeline();
        let long_body = "Sentence about revenue. ".repeat(30);
        let r1 = pipeline
            .ingest(text_doc("news-2", "AAPL", &long_body))
            .await
            .unwrap();
        assert!(r1.chunk_count > 1);

        let r2 = pipeline
            .ingest(text_doc("news-2", "AAPL", "Short replacement about revenue."))
            .await
            .unwrap();
        assert_eq!(r2.chunk_count, 1);

        let hits = index
            .query("test", &embed_one("revenue"), 50, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "stale chunks must not survive re-ingestion");
    }

    #[tokio::test]
    async fn unparseable_document_leaves_no_records() {
        let (pipeline, index, store) = pipeline();
        let mut doc = text_doc("bad-1", "AAPL", "ignored");
        doc.format = Some(crate::models::DocumentFormat::Pdf);
        doc.bytes = b"definitely not a pdf".to_vec();

        let err = pipeline.ingest(doc).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));

        assert!(store
            .get(&document_id_for("bad-1"))
            .await
            .unwrap()
            .is_none());
        let hits = index
            .query("test", &embed_one("anything"), 5, &MetadataFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn batch_contains_per_document_failures() {
        let (pipeline, _, _) = pipeline();
        let mut bad = text_doc("doc-3", "AAPL", "ignored");
        bad.format = Some(crate::models::DocumentFormat::Pdf);
        bad.bytes = b"broken".to_vec();

        let outcome = pipeline
            .ingest_batch(vec![
                text_doc("doc-1", "AAPL", "First document body."),
                text_doc("doc-2", "AAPL", "Second document body."),
                bad,
                text_doc("doc-4", "AAPL", "Fourth document body."),
                text_doc("doc-5", "AAPL", "Fifth document body."),
            ])
            .await;

        assert_eq!(outcome.succeeded.len(), 4);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].source_id, "doc-3");
    }
}
