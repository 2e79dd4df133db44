//! # Finsight
//!
//! A retrieval-augmented research and analysis pipeline for financial
//! documents.
//!
//! Finsight ingests heterogeneous documents (SEC filings, news pages,
//! uploaded files), normalizes and chunks them, embeds the chunks, and
//! indexes them for metadata-filtered vector retrieval. On top of that it
//! answers questions with citation-validated grounding, extracts financial
//! entities, metrics, and sentiment, and assembles multi-section research
//! reports with per-section failure containment.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────┐
//! │  Fetchers    │──▶│   Pipeline     │──▶│  Vector   │
//! │ (bytes+fmt)  │   │ Normalize      │   │  Index    │
//! └──────────────┘   │ Chunk + Embed  │   └─────┬─────┘
//!                    └───────────────┘         │
//!                          query ──▶ Retriever ─┤
//!                                              ▼
//!                                     Synthesizer → Answer
//!                          report ──▶ Orchestrator → Report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`normalize`] | PDF/DOCX/HTML/text normalization |
//! | [`chunk`] | Boundary-aware chunking with overlap |
//! | [`embedding`] | Embedding capability and content-hash cache |
//! | [`index`] | Vector index capability contract |
//! | [`store`] | Document store capability contract |
//! | [`retrieve`] | Query expansion, search, deduplication |
//! | [`synthesize`] | Grounded answers with citation validation |
//! | [`extract`] | Entity, metric, and sentiment passes |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`report`] | Multi-section report orchestration |
//! | [`engine`] | Operation surface wiring it all together |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod report;
pub mod retrieve;
pub mod store;
pub mod synthesize;
