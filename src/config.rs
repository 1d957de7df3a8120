use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use documind_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use documind_core::embedding::DEFAULT_DIMS;
use documind_core::models::DEFAULT_K;
use documind_core::protocol::{
    GenerationConfig, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "documind.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./documind_index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files larger than this are rejected before extraction.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub search_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            embed_timeout_secs: default_timeout_secs(),
            search_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_provider(),
            model: None,
            dims: DEFAULT_DIMS,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// The model label an index built with this configuration records.
    /// Matches what the configured embedder reports as its model name.
    pub fn model_name(&self) -> String {
        match self.provider.as_str() {
            "hash" => "hash".to_string(),
            _ => self.model.clone().unwrap_or_default(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    DEFAULT_DIMS
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

impl EmbeddingConfig {
    /// Providers that call out over HTTP and need a model name.
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "ollama" | "openai")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationSettings {
    /// Worker command line; the first element is the program.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Forwarded to the worker as `--endpoint` when set.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            endpoint: None,
            model: default_model(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: default_generation_timeout(),
            check_timeout_secs: default_check_timeout(),
        }
    }
}

impl GenerationSettings {
    /// Parameters sent with every generation request.
    pub fn request_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: self.model.clone(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["dmind-worker".to_string()]
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_check_timeout() -> u64 {
    8
}

/// Load configuration from `path`, or from `documind.toml` in the working
/// directory if present, or fall back to defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                load_config(fallback)
            } else {
                let config = Config::default();
                validate(&config)?;
                Ok(config)
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, or openai.",
            other
        ),
    }
    if config.embedding.is_remote() && config.embedding.model.as_deref().unwrap_or("").is_empty()
    {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate generation
    if config.generation.command.is_empty() || config.generation.command[0].trim().is_empty() {
        anyhow::bail!("generation.command must name a program");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.generation.command, vec!["dmind-worker"]);
        assert_eq!(config.generation.timeout_secs, 60);
        assert_eq!(config.generation.check_timeout_secs, 8);
        assert_eq!(config.ingest.max_file_bytes, 50 * 1024 * 1024);
        assert_eq!(
            config.generation.request_config(),
            GenerationConfig::default()
        );
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [index]
            dir = "/tmp/idx"

            [chunking]
            chunk_size = 20
            chunk_overlap = 5

            [generation]
            command = ["sh", "worker.sh"]
            endpoint = "http://gpu:11434"
            temperature = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.index.dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.chunking.chunk_size, 20);
        assert_eq!(config.generation.command, vec!["sh", "worker.sh"]);
        assert_eq!(config.generation.endpoint.as_deref(), Some("http://gpu:11434"));
        assert_eq!(config.generation.max_tokens, 500);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn remote_provider_needs_model() {
        let err = parse_config("[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
        assert!(parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n").is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_config("[retrieval]\nk = 0\n").is_err());
        assert!(parse_config("[embedding]\nprovider = \"local\"\n").is_err());
        assert!(parse_config("[generation]\ncommand = []\n").is_err());
        assert!(parse_config("[generation]\ntemperature = 3.5\n").is_err());
    }

    #[test]
    fn embedding_model_name_follows_provider() {
        assert_eq!(EmbeddingConfig::default().model_name(), "hash");
        let config =
            parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n").unwrap();
        assert_eq!(config.embedding.model_name(), "nomic-embed-text");
    }
}
