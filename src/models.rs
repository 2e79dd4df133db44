//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, retrieval hits, answers,
//! extraction artifacts, and reports that flow through ingestion, query,
//! and report generation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Filing,
    News,
    Upload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Filing => "filing",
            SourceType::News => "news",
            SourceType::Upload => "upload",
        }
    }
}

/// Declared or sniffed input format of a raw document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Html,
    Text,
}

/// Raw item produced by a fetcher (SEC downloader, news fetcher, upload
/// handler) before normalization.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Stable identifier within the source; re-ingesting the same id
    /// supersedes the previous version.
    pub source_id: String,
    pub source_type: SourceType,
    /// Declared format. `None` means sniff from the bytes.
    pub format: Option<DocumentFormat>,
    pub ticker: Option<String>,
    pub filing_type: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub bytes: Vec<u8>,
}

/// Normalized document. Immutable once stored; re-ingestion of the same
/// source id replaces it wholesale rather than mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub ticker: Option<String>,
    pub source_type: SourceType,
    pub filing_type: Option<String>,
    pub published_at: DateTime<Utc>,
    pub title: Option<String>,
    /// Normalized plain text.
    pub text: String,
    /// Set when normalization recovered only part of the content.
    pub degraded: bool,
    /// Open extension map for fields outside the known schema.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Metadata carried on every indexed chunk: the parent document's known
/// fields plus chunk-local position info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub ticker: Option<String>,
    pub source_type: SourceType,
    pub filing_type: Option<String>,
    pub published_at: DateTime<Utc>,
    pub title: Option<String>,
    pub section: Option<String>,
    pub page: Option<u32>,
}

impl ChunkMetadata {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            ticker: doc.ticker.clone(),
            source_type: doc.source_type,
            filing_type: doc.filing_type.clone(),
            published_at: doc.published_at,
            title: doc.title.clone(),
            section: None,
            page: None,
        }
    }
}

/// A span of a document's normalized text, the unit of embedding and
/// retrieval. Offsets are byte offsets into the normalized text; adjacent
/// chunks overlap by at most the configured overlap window.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// SHA-256 of the chunk text; key for the embedding cache.
    pub hash: String,
    /// Filled by the embedding stage; empty until then.
    pub embedding: Vec<f32>,
}

/// A retrieval result. Ephemeral, produced per query, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Grounding status of an [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Synthesized from retrieved context.
    Grounded,
    /// Retrieval genuinely matched nothing. A valid answer state, not an
    /// error.
    NoGroundingFound,
    /// Retrieval infrastructure failed and the answer could not be
    /// grounded. Reported distinctly from a genuine no-match.
    Degraded,
}

/// A synthesized answer with citations into the retrieved chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// Chunk ids in citation order. Every id was retrieved for this query;
    /// invented citations are dropped before the answer is returned.
    pub citations: Vec<String>,
    pub confidence: Option<f64>,
    pub status: AnswerStatus,
}

impl Answer {
    /// Answer used when retrieval produced nothing to ground on.
    pub fn no_grounding() -> Self {
        Self {
            text: "I couldn't find relevant information to answer your question. \
                   Please try a different question or provide more specific details."
                .to_string(),
            citations: Vec::new(),
            confidence: None,
            status: AnswerStatus::NoGroundingFound,
        }
    }

    /// Answer used when retrieval infrastructure failed.
    pub fn degraded(reason: &str) -> Self {
        Self {
            text: format!("Retrieval was unavailable for this question ({reason})."),
            citations: Vec::new(),
            confidence: None,
            status: AnswerStatus::Degraded,
        }
    }
}

/// Kind of entity recognized by the entity pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ticker,
    Money,
    Percent,
    Date,
    Metric,
}

/// A recognized entity with its byte span in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// A named financial metric value with its unit and period, when found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub unit: String,
    pub period: Option<String>,
}

/// Combined output of the entity, metric, and sentiment passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Always in `[-1.0, 1.0]`.
    pub sentiment_score: f64,
}

/// Sentiment classification against the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentClass {
    Positive,
    Neutral,
    Negative,
}

/// Per-document detail inside a [`SentimentSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSentiment {
    pub document_id: String,
    pub title: Option<String>,
    pub published_at: DateTime<Utc>,
    pub score: f64,
    pub class: SentimentClass,
}

/// Aggregate sentiment over a ticker's documents in a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub ticker: String,
    pub average: f64,
    pub class: SentimentClass,
    /// Share of documents per class, in percent.
    pub positive_pct: f64,
    pub neutral_pct: f64,
    pub negative_pct: f64,
    pub documents_analyzed: usize,
    pub details: Vec<DocumentSentiment>,
}

/// One section of a research report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub answer: Answer,
}

/// A multi-section research report. Assembled, not persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub ticker: String,
    pub period: Option<String>,
    pub sections: Vec<ReportSection>,
    pub generated_at: DateTime<Utc>,
}

/// Receipt for a successfully ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub document_id: String,
    pub chunk_count: usize,
    pub degraded: bool,
}

/// One failed document inside a batch; the batch itself continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFailure {
    pub source_id: String,
    pub error: String,
}

/// Outcome of a batch ingestion. The unit of atomicity is the individual
/// document: failures sit alongside the receipts of the documents that
/// succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<IngestReceipt>,
    pub failed: Vec<IngestFailure>,
}
