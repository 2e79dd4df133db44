//! # Finsight CLI (`fin`)
//!
//! One-shot interface over the research pipeline. Each command can load
//! documents into the engine before running its operation, so a full
//! ingest-then-ask flow fits in one invocation:
//!
//! ```bash
//! fin query "What was AAPL's Q1 revenue?" --ticker AAPL filings/aapl-10q.pdf
//! fin report AAPL --period "Q1 2024" news/*.html
//! fin sentiment AAPL --days 30 news/*.html
//! fin metrics AAPL --period 2024 filings/*.txt
//! ```
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file; settings not present fall back to their defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use finsight::config::{load_config, Config};
use finsight::engine::ResearchEngine;
use finsight::models::{AnswerStatus, DocumentFormat, SourceDocument, SourceType};

#[derive(Parser)]
#[command(
    name = "fin",
    about = "Finsight — a retrieval-augmented research pipeline for financial documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply if absent.
    #[arg(long, global = true, default_value = "./config/finsight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceTypeArg {
    Filing,
    News,
    Upload,
}

impl From<SourceTypeArg> for SourceType {
    fn from(value: SourceTypeArg) -> Self {
        match value {
            SourceTypeArg::Filing => SourceType::Filing,
            SourceTypeArg::News => SourceType::News,
            SourceTypeArg::Upload => SourceType::Upload,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize, chunk, embed, and index documents.
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Ticker to attach to every document.
        #[arg(long)]
        ticker: Option<String>,

        /// Source type for the documents.
        #[arg(long, value_enum, default_value = "upload")]
        source_type: SourceTypeArg,

        /// Filing type (10-K, 10-Q, 8-K) for filing documents.
        #[arg(long)]
        filing_type: Option<String>,
    },

    /// Ask a question grounded in the loaded documents.
    Query {
        /// The question.
        text: String,

        /// Restrict retrieval to this ticker.
        #[arg(long)]
        ticker: Option<String>,

        /// Restrict retrieval to a source type.
        #[arg(long, value_enum)]
        source_type: Option<SourceTypeArg>,

        /// Documents to load before querying.
        files: Vec<PathBuf>,
    },

    /// Generate a multi-section research report for a ticker.
    Report {
        ticker: String,

        /// Section topics; configured defaults apply when omitted.
        #[arg(long = "topic")]
        topics: Vec<String>,

        /// Time period the report focuses on.
        #[arg(long)]
        period: Option<String>,

        /// Documents to load before generating.
        files: Vec<PathBuf>,
    },

    /// Aggregate sentiment over a ticker's recent documents.
    Sentiment {
        ticker: String,

        /// Window in days.
        #[arg(long, default_value_t = 30)]
        days: i64,

        /// Documents to load before analyzing.
        files: Vec<PathBuf>,
    },

    /// Extract named financial metrics for a ticker.
    Metrics {
        ticker: String,

        /// Time period to focus the extraction on.
        #[arg(long)]
        period: Option<String>,

        /// Documents to load before extracting.
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };
    let engine = ResearchEngine::from_config(config)?;

    match cli.command {
        Commands::Ingest {
            files,
            ticker,
            source_type,
            filing_type,
        } => {
            let docs = read_documents(&files, ticker.as_deref(), source_type.into(), filing_type)?;
            let outcome = engine.ingest_batch(docs).await;
            for receipt in &outcome.succeeded {
                println!(
                    "ingested {} ({} chunks{})",
                    receipt.document_id,
                    receipt.chunk_count,
                    if receipt.degraded { ", degraded" } else { "" }
                );
            }
            for failure in &outcome.failed {
                println!("failed {}: {}", failure.source_id, failure.error);
            }
            println!(
                "ok ({} succeeded, {} failed)",
                outcome.succeeded.len(),
                outcome.failed.len()
            );
        }

        Commands::Query {
            text,
            ticker,
            source_type,
            files,
        } => {
            load_files(&engine, &files, ticker.as_deref()).await?;
            let answer = engine
                .query(&text, ticker.as_deref(), source_type.map(Into::into))
                .await?;
            println!("{}", answer.text);
            match answer.status {
                AnswerStatus::Grounded => {
                    if !answer.citations.is_empty() {
                        println!("\nsources:");
                        for id in &answer.citations {
                            println!("  {id}");
                        }
                    }
                }
                AnswerStatus::NoGroundingFound => println!("\n(no grounding found)"),
                AnswerStatus::Degraded => println!("\n(retrieval degraded)"),
            }
        }

        Commands::Report {
            ticker,
            topics,
            period,
            files,
        } => {
            load_files(&engine, &files, Some(&ticker)).await?;
            let report = engine
                .generate_report(&ticker, &topics, period.as_deref())
                .await;
            println!("# {} research report ({})", report.ticker, report.id);
            for section in &report.sections {
                println!("\n## {}\n", section.title);
                println!("{}", section.answer.text);
            }
        }

        Commands::Sentiment {
            ticker,
            days,
            files,
        } => {
            load_files(&engine, &files, Some(&ticker)).await?;
            let summary = engine.analyze_sentiment(&ticker, days).await?;
            println!(
                "{}: {:?} (avg {:.3} over {} documents, last {} days)",
                summary.ticker, summary.class, summary.average, summary.documents_analyzed, days
            );
            println!(
                "  positive {:.0}%  neutral {:.0}%  negative {:.0}%",
                summary.positive_pct, summary.neutral_pct, summary.negative_pct
            );
            for d in &summary.details {
                println!(
                    "  {:.3}  {}  {}",
                    d.score,
                    d.published_at.format("%Y-%m-%d"),
                    d.title.as_deref().unwrap_or(&d.document_id)
                );
            }
        }

        Commands::Metrics {
            ticker,
            period,
            files,
        } => {
            load_files(&engine, &files, Some(&ticker)).await?;
            let metrics = engine.extract_metrics(&ticker, period.as_deref()).await?;
            if metrics.is_empty() {
                println!("no metrics found for {ticker}");
            }
            for (name, value) in &metrics {
                println!(
                    "{name}: {}{:.2}{}",
                    if value.unit == "$" { "$" } else { "" },
                    value.value,
                    if value.unit == "%" { "%" } else { "" }
                );
                if let Some(p) = &value.period {
                    println!("  period: {p}");
                }
            }
        }
    }

    Ok(())
}

/// Read files into source documents; recognized extensions declare the
/// format, anything else is sniffed from content.
fn read_documents(
    files: &[PathBuf],
    ticker: Option<&str>,
    source_type: SourceType,
    filing_type: Option<String>,
) -> Result<Vec<SourceDocument>> {
    files
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(SourceDocument {
                source_id: path.display().to_string(),
                source_type,
                format: format_from_extension(path),
                ticker: ticker.map(String::from),
                filing_type: filing_type.clone(),
                published_at: None,
                bytes,
            })
        })
        .collect()
}

/// Map a file extension to a declared format, leaving unknown extensions
/// to content sniffing.
fn format_from_extension(path: &std::path::Path) -> Option<DocumentFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("pdf") => Some(DocumentFormat::Pdf),
        Some("docx") => Some(DocumentFormat::Docx),
        Some("html") | Some("htm") => Some(DocumentFormat::Html),
        Some("txt") | Some("md") => Some(DocumentFormat::Text),
        _ => None,
    }
}

async fn load_files(engine: &ResearchEngine, files: &[PathBuf], ticker: Option<&str>) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let docs = read_documents(files, ticker, SourceType::Upload, None)?;
    let outcome = engine.ingest_batch(docs).await;
    for failure in &outcome.failed {
        eprintln!("warning: failed to load {}: {}", failure.source_id, failure.error);
    }
    Ok(())
}
