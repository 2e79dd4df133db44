//! Multi-section research report orchestration.
//!
//! Each section runs as an independent task (retrieve → synthesize);
//! section failures are recorded as placeholders and never abort the
//! remaining sections. The report is assembled only after every section
//! has settled.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use crate::config::{ReportConfig, RetrievalConfig};
use crate::index::MetadataFilter;
use crate::models::{Answer, AnswerStatus, Report, ReportSection};
use crate::retrieve::Retriever;
use crate::synthesize::Synthesizer;

pub struct ReportOrchestrator {
    retriever: Arc<Retriever>,
    synthesizer: Arc<Synthesizer>,
    config: ReportConfig,
    top_k: usize,
}

impl ReportOrchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        synthesizer: Arc<Synthesizer>,
        config: ReportConfig,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            config,
            top_k: retrieval.top_k,
        }
    }

    /// Generate a report for `ticker` covering `topics` (the configured
    /// defaults when empty), optionally focused on a time period.
    pub async fn generate(&self, ticker: &str, topics: &[String], period: Option<&str>) -> Report {
        let mut titles: Vec<String> = Vec::new();
        if self.config.include_summary {
            titles.push("Executive Summary".to_string());
        }
        if topics.is_empty() {
            titles.extend(self.config.default_topics.iter().cloned());
        } else {
            titles.extend(topics.iter().cloned());
        }

        let mut set = JoinSet::new();
        for (position, title) in titles.iter().enumerate() {
            let retriever = Arc::clone(&self.retriever);
            let synthesizer = Arc::clone(&self.synthesizer);
            let query = section_query(ticker, title, period);
            let filter = MetadataFilter::for_ticker(ticker);
            let title = title.clone();
            let top_k = self.top_k;

            set.spawn(async move {
                let answer = match retriever.retrieve(&query, &filter, top_k).await {
                    Ok(hits) => match synthesizer.synthesize(&query, &hits).await {
                        Ok(answer) => answer,
                        Err(e) => unavailable(&title, &e.to_string()),
                    },
                    Err(e) => unavailable(&title, &e.to_string()),
                };
                (position, ReportSection { title, answer })
            });
        }

        // Settle every section, then restore topic order.
        let mut sections: Vec<(usize, ReportSection)> = Vec::with_capacity(titles.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => sections.push(entry),
                Err(e) => warn!(error = %e, "report section task panicked"),
            }
        }
        sections.sort_by_key(|(position, _)| *position);

        Report {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            period: period.map(String::from),
            sections: sections.into_iter().map(|(_, s)| s).collect(),
            generated_at: Utc::now(),
        }
    }
}

fn section_query(ticker: &str, topic: &str, period: Option<&str>) -> String {
    let mut query = if topic == "Executive Summary" {
        format!("Provide a concise executive summary of {ticker}")
    } else {
        format!("Provide an analysis of {ticker}'s {topic}")
    };
    if let Some(p) = period {
        query.push_str(&format!(" for {p}"));
    }
    query
}

fn unavailable(title: &str, reason: &str) -> Answer {
    warn!(section = %title, %reason, "report section unavailable");
    Answer {
        text: format!("section unavailable: {reason}"),
        citations: Vec::new(),
        confidence: None,
        status: AnswerStatus::Degraded,
    }
}
