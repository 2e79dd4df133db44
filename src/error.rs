//! Error taxonomy for the research pipeline.
//!
//! Failures of external capabilities surface as the corresponding
//! `*Unavailable` variant after retry exhaustion. Per-document failures in a
//! batch are contained in [`BatchOutcome`](crate::models::BatchOutcome)
//! rather than propagated; a hallucinated citation is a logged warning, and
//! an answer without grounding is an [`AnswerStatus`](crate::models::AnswerStatus),
//! not an error.

use thiserror::Error;

/// Errors produced by pipeline operations (ingest, query, report sections).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document format could not be determined or parsed at all.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Normalization produced no usable text.
    #[error("document yielded no usable text")]
    EmptyContent,

    /// The embedding capability failed after retry exhaustion.
    ///
    /// Never downgraded to a skip: a missing embedding silently corrupts
    /// retrieval recall, so the owning operation fails instead.
    #[error("embedding capability unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation capability failed after retry exhaustion.
    #[error("generation capability unavailable: {0}")]
    GenerationUnavailable(String),

    /// The vector index rejected an operation or could not be reached.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// The document store rejected an operation or could not be reached.
    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
