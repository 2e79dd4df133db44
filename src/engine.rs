//! The operation surface of the pipeline.
//!
//! [`ResearchEngine`] wires the components together behind the operations
//! an API layer consumes: `ingest`, `query`, `generate_report`,
//! `analyze_sentiment`, and `extract_metrics`. External capabilities are
//! injected, so tests and embedded deployments run against in-memory
//! backends while production wires HTTP providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use chrono::{Duration, Utc};
use tracing::warn;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{create_embedding_provider, Embedder, EmbeddingProvider};
use crate::error::{PipelineError, Result};
use crate::extract::{create_extractor, sentiment, ExtractionCache, Extractor};
use crate::index::{InMemoryIndex, MetadataFilter, VectorIndex};
use crate::ingest::IngestPipeline;
use crate::models::{
    Answer, BatchOutcome, Document, DocumentSentiment, IngestReceipt, MetricValue, Report,
    SentimentClass, SentimentSummary, SourceDocument, SourceType,
};
use crate::report::ReportOrchestrator;
use crate::retrieve::Retriever;
use crate::store::{DocumentQuery, DocumentStore, InMemoryDocumentStore};
use crate::synthesize::{create_generation_provider, GenerationProvider, Synthesizer};

pub struct ResearchEngine {
    config: Config,
    store: Arc<dyn DocumentStore>,
    pipeline: Arc<IngestPipeline>,
    retriever: Arc<Retriever>,
    synthesizer: Arc<Synthesizer>,
    orchestrator: ReportOrchestrator,
    extractor: Arc<dyn Extractor>,
    extraction_cache: ExtractionCache,
}

impl ResearchEngine {
    /// Wire an engine from injected capabilities.
    pub fn new(
        config: Config,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        generation_provider: Arc<dyn GenerationProvider>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
    ) -> AnyResult<Self> {
        let embedder = Arc::new(Embedder::new(embedding_provider, config.embedding.batch_size));
        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            index.clone(),
            config.index.namespace.clone(),
            config.retrieval.clone(),
        ));
        let synthesizer = Arc::new(Synthesizer::new(
            generation_provider,
            config.generation.clone(),
        ));
        let orchestrator = ReportOrchestrator::new(
            retriever.clone(),
            synthesizer.clone(),
            config.report.clone(),
            &config.retrieval,
        );
        let pipeline = Arc::new(IngestPipeline::new(
            config.chunking.clone(),
            embedder,
            index,
            store.clone(),
            config.index.namespace.clone(),
        ));
        let extractor = create_extractor(&config.extraction)?;

        Ok(Self {
            config,
            store,
            pipeline,
            retriever,
            synthesizer,
            orchestrator,
            extractor,
            extraction_cache: ExtractionCache::new(),
        })
    }

    /// Wire an engine from configuration alone: HTTP model providers and
    /// the bundled in-memory index and store.
    pub fn from_config(config: Config) -> AnyResult<Self> {
        let embedding_provider = create_embedding_provider(&config.embedding)?;
        let generation_provider = create_generation_provider(&config.generation)?;
        let index: Arc<dyn VectorIndex> = match config.embedding.dims {
            Some(dims) => Arc::new(InMemoryIndex::with_dims(dims)),
            None => Arc::new(InMemoryIndex::new()),
        };
        let store = Arc::new(InMemoryDocumentStore::new());
        Self::new(config, embedding_provider, generation_provider, index, store)
    }

    /// Ingest a single document end to end.
    pub async fn ingest(&self, doc: SourceDocument) -> Result<IngestReceipt> {
        let receipt = self.pipeline.ingest(doc).await?;
        self.extraction_cache.invalidate(&receipt.document_id);
        Ok(receipt)
    }

    /// Ingest a batch; per-document failures are contained in the outcome.
    pub async fn ingest_batch(&self, docs: Vec<SourceDocument>) -> BatchOutcome {
        let outcome = Arc::clone(&self.pipeline).ingest_batch(docs).await;
        for receipt in &outcome.succeeded {
            self.extraction_cache.invalidate(&receipt.document_id);
        }
        outcome
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.pipeline.delete_document(document_id).await?;
        self.extraction_cache.invalidate(document_id);
        Ok(())
    }

    /// Answer a question grounded in the indexed documents.
    ///
    /// Index unavailability degrades to a distinctly-marked answer with a
    /// warning rather than masquerading as a genuine no-match; embedding
    /// and generation failures propagate as errors.
    pub async fn query(
        &self,
        text: &str,
        ticker: Option<&str>,
        source_type: Option<SourceType>,
    ) -> Result<Answer> {
        let filter = MetadataFilter {
            ticker: ticker.map(String::from),
            source_type,
            ..MetadataFilter::default()
        };

        match self
            .retriever
            .retrieve(text, &filter, self.config.retrieval.top_k)
            .await
        {
            Ok(hits) => self.synthesizer.synthesize(text, &hits).await,
            Err(PipelineError::IndexUnavailable(reason)) => {
                warn!(%reason, "index unavailable; returning degraded answer");
                Ok(Answer::degraded(&reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Generate a multi-section research report.
    pub async fn generate_report(
        &self,
        ticker: &str,
        topics: &[String],
        period: Option<&str>,
    ) -> Report {
        self.orchestrator.generate(ticker, topics, period).await
    }

    /// Aggregate sentiment over a ticker's documents from the last
    /// `window_days` days.
    pub async fn analyze_sentiment(
        &self,
        ticker: &str,
        window_days: i64,
    ) -> Result<SentimentSummary> {
        let query = DocumentQuery {
            ticker: Some(ticker.to_string()),
            published_after: Some(Utc::now() - Duration::days(window_days)),
            ..DocumentQuery::default()
        };
        let docs = self
            .store
            .list(&query)
            .await
            .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

        let threshold = self.config.extraction.sentiment_threshold;
        let mut details: Vec<DocumentSentiment> = Vec::new();
        for doc in &docs {
            let score = self.document_sentiment(doc);
            details.push(DocumentSentiment {
                document_id: doc.id.clone(),
                title: doc.title.clone(),
                published_at: doc.published_at,
                score,
                class: classify(score, threshold),
            });
        }

        let n = details.len();
        let average = if n == 0 {
            0.0
        } else {
            details.iter().map(|d| d.score).sum::<f64>() / n as f64
        };
        let count =
            |class: SentimentClass| details.iter().filter(|d| d.class == class).count() as f64;
        let pct = |class: SentimentClass| {
            if n == 0 {
                0.0
            } else {
                count(class) / n as f64 * 100.0
            }
        };

        Ok(SentimentSummary {
            ticker: ticker.to_string(),
            average,
            class: classify(average, threshold),
            positive_pct: pct(SentimentClass::Positive),
            neutral_pct: pct(SentimentClass::Neutral),
            negative_pct: pct(SentimentClass::Negative),
            documents_analyzed: n,
            details,
        })
    }

    /// A document's sentiment: the length-weighted average of its chunks'
    /// scores, served from the extraction cache.
    fn document_sentiment(&self, doc: &Document) -> f64 {
        let chunks = chunk_text(
            &doc.id,
            &doc.text,
            self.config.chunking.max_chars,
            self.config.chunking.overlap_chars,
        );
        let parts: Vec<(f64, usize)> = chunks
            .iter()
            .map(|c| {
                let result =
                    self.extraction_cache
                        .get_or_extract(&c.id, &c.text, self.extractor.as_ref());
                (result.sentiment_score, c.text.len())
            })
            .collect();
        sentiment::weighted_average(&parts)
    }

    /// Harvest named financial metrics for a ticker by retrieving
    /// metric-focused context and running the metric pass over it.
    pub async fn extract_metrics(
        &self,
        ticker: &str,
        period: Option<&str>,
    ) -> Result<BTreeMap<String, MetricValue>> {
        let filter = MetadataFilter::for_ticker(ticker);
        let mut merged: BTreeMap<String, MetricValue> = BTreeMap::new();

        for metric_type in ["revenue", "earnings", "growth"] {
            let query = metric_query(ticker, metric_type, period);
            let hits = self
                .retriever
                .retrieve(&query, &filter, self.config.retrieval.top_k)
                .await?;

            // Higher-scored hits fill the map first and are not overwritten.
            for hit in &hits {
                let result = self.extraction_cache.get_or_extract(
                    &hit.chunk_id,
                    &hit.text,
                    self.extractor.as_ref(),
                );
                for (name, value) in &result.metrics {
                    merged
                        .entry(name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        Ok(merged)
    }
}

/// Metric-focused query construction, one query shape per metric family.
fn metric_query(ticker: &str, metric_type: &str, period: Option<&str>) -> String {
    let period_clause = period.map(|p| format!(" in {p}")).unwrap_or_default();
    match metric_type {
        "revenue" => {
            format!("What was {ticker}'s revenue{period_clause}? Include growth rates and trends.")
        }
        "profit" | "earnings" => format!(
            "What was {ticker}'s profit or earnings{period_clause}? Include net income, EPS, and profit margins."
        ),
        "growth" => format!(
            "What is {ticker}'s growth rate{period_clause}? Include revenue growth, profit growth, and market expansion."
        ),
        other => format!("Analyze {ticker}'s {other}{period_clause}"),
    }
}

fn classify(score: f64, threshold: f64) -> SentimentClass {
    if score > threshold {
        SentimentClass::Positive
    } else if score < -threshold {
        SentimentClass::Negative
    } else {
        SentimentClass::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_queries_follow_family_shapes() {
        assert_eq!(
            metric_query("AAPL", "revenue", Some("Q1 2024")),
            "What was AAPL's revenue in Q1 2024? Include growth rates and trends."
        );
        assert!(metric_query("AAPL", "earnings", None).contains("net income, EPS"));
        assert!(metric_query("AAPL", "capex", None).starts_with("Analyze AAPL's capex"));
    }

    #[test]
    fn classification_uses_threshold_band() {
        assert_eq!(classify(0.2, 0.05), SentimentClass::Positive);
        assert_eq!(classify(-0.2, 0.05), SentimentClass::Negative);
        assert_eq!(classify(0.01, 0.05), SentimentClass::Neutral);
        assert_eq!(classify(-0.05, 0.05), SentimentClass::Neutral);
    }
}
