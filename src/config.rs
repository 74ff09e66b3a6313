use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Path (or PATH name) of the external drawing conversion tool.
    #[serde(default = "default_tool_path")]
    pub tool_path: String,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_tool_path() -> String {
    "dwg_to_json".to_string()
}
fn default_extraction_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Cap on representative entity labels sampled into each layer chunk.
    #[serde(default = "default_layer_entity_sample")]
    pub layer_entity_sample: usize,
    /// Maximum characters per chunk text; longer text is truncated and
    /// flagged rather than rejected.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            layer_entity_sample: default_layer_entity_sample(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

fn default_layer_entity_sample() -> usize {
    50
}
fn default_max_text_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum texts per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum aggregate characters per provider call.
    #[serde(default = "default_max_batch_chars")]
    pub max_batch_chars: usize,
    /// Concurrent in-flight provider calls per document.
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_batch_chars: default_max_batch_chars(),
            concurrency: default_embed_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_batch_chars() -> usize {
    32_000
}
fn default_embed_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reasoning_retries")]
    pub max_retries: u32,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_reasoning_retries(),
            timeout_secs: default_reasoning_timeout(),
        }
    }
}

fn default_reasoning_retries() -> u32 {
    3
}
fn default_reasoning_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComplianceConfig {
    /// Candidate clauses retrieved per target chunk.
    #[serde(default = "default_clause_top_k")]
    pub clause_top_k: usize,
    /// Concurrent in-flight judgment calls.
    #[serde(default = "default_judge_concurrency")]
    pub concurrency: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            clause_top_k: default_clause_top_k(),
            concurrency: default_judge_concurrency(),
        }
    }
}

fn default_clause_top_k() -> usize {
    5
}
fn default_judge_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl ReasoningConfig {
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
    if config.chunking.layer_entity_sample == 0 {
        anyhow::bail!("chunking.layer_entity_sample must be > 0");
    }
    if config.chunking.max_text_chars == 0 {
        anyhow::bail!("chunking.max_text_chars must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be > 0");
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
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.reasoning.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown reasoning provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.compliance.clause_top_k == 0 {
        anyhow::bail!("compliance.clause_top_k must be > 0");
    }
    if config.compliance.concurrency == 0 {
        anyhow::bail!("compliance.concurrency must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[db]\npath = \"/tmp/cads.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.layer_entity_sample, 50);
        assert_eq!(config.chunking.max_text_chars, 2000);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.compliance.clause_top_k, 5);
        assert_eq!(config.retrieval.final_limit, 10);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse(
            "[db]\npath = \"/tmp/cads.sqlite\"\n[embedding]\nprovider = \"openai\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("dims"));

        let ok = parse(
            "[db]\npath = \"/tmp/cads.sqlite\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse(
            "[db]\npath = \"/tmp/cads.sqlite\"\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 8\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_sample_cap_rejected() {
        let err = parse(
            "[db]\npath = \"/tmp/cads.sqlite\"\n[chunking]\nlayer_entity_sample = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("layer_entity_sample"));
    }
}
