use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk length in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Overlap window between adjacent chunks, in characters. Must be
    /// smaller than `max_chars`.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1600
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results returned to the caller after deduplication.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates fetched from the index before deduplication.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Hits from same-titled documents published within this window are
    /// collapsed to the best-scoring one.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,
    /// Query-expansion table: abbreviation -> expansion appended to the
    /// query. Merged over the built-in defaults.
    #[serde(default)]
    pub expansions: BTreeMap<String, String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            dedup_window_secs: default_dedup_window_secs(),
            expansions: BTreeMap::new(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_candidate_k() -> usize {
    40
}
fn default_dedup_window_secs() -> i64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Texts per external call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Context window budget for retrieved chunks, in characters.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_context_chars: default_max_context_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Isolation boundary within the vector index. Every operation is
    /// scoped to it; results never cross namespaces.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    "finsight".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Extraction implementation. Only `"heuristic"` is bundled; swapping
    /// in a model-backed implementation is a config change, not a code
    /// change.
    #[serde(default = "default_extractor")]
    pub extractor: String,
    /// Scores above the threshold classify positive; below its negation,
    /// negative.
    #[serde(default = "default_sentiment_threshold")]
    pub sentiment_threshold: f64,
    /// Metric-name and value entities must co-occur within this many bytes
    /// to pair up.
    #[serde(default = "default_metric_window_chars")]
    pub metric_window_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
            sentiment_threshold: default_sentiment_threshold(),
            metric_window_chars: default_metric_window_chars(),
        }
    }
}

fn default_extractor() -> String {
    "heuristic".to_string()
}

fn default_sentiment_threshold() -> f64 {
    0.05
}
fn default_metric_window_chars() -> usize {
    160
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    /// Topics used when the caller supplies none.
    #[serde(default = "default_topics")]
    pub default_topics: Vec<String>,
    /// Prepend an executive-summary section to every report.
    #[serde(default = "default_include_summary")]
    pub include_summary: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            default_topics: default_topics(),
            include_summary: default_include_summary(),
        }
    }
}

fn default_topics() -> Vec<String> {
    vec![
        "Financial Performance".to_string(),
        "Business Overview".to_string(),
        "Risks".to_string(),
        "Future Outlook".to_string(),
    ]
}
fn default_include_summary() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }
    if config.retrieval.dedup_window_secs < 0 {
        anyhow::bail!("retrieval.dedup_window_secs must be >= 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.extraction.sentiment_threshold) {
        anyhow::bail!("extraction.sentiment_threshold must be in [0.0, 1.0]");
    }
    if config.extraction.extractor != "heuristic" {
        anyhow::bail!(
            "Unknown extractor: '{}'. Must be heuristic.",
            config.extraction.extractor
        );
    }

    if config.index.namespace.trim().is_empty() {
        anyhow::bail!("index.namespace must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("finsight.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn empty_config_uses_defaults() {
        let (_dir, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_chars, 1600);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.index.namespace, "finsight");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let (_dir, path) = write_config("[chunking]\nmax_chars = 100\noverlap_chars = 100\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_without_dims() {
        let (_dir, path) = write_config("[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let (_dir, path) = write_config("[embedding]\nprovider = \"quantum\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn custom_expansions_parse() {
        let (_dir, path) =
            write_config("[retrieval.expansions]\n\"EPS\" = \"earnings per share\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(
            config.retrieval.expansions.get("EPS").map(String::as_str),
            Some("earnings per share")
        );
    }
}
