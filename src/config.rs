//! TOML configuration parsing and validation.
//!
//! Only `[db]` is mandatory; every other section has defaults matching the
//! reference deployment (OpenAI embeddings with `D = 1536`, 1000/200
//! character chunking, top-5 retrieval).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blobs: BlobConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default = "default_blob_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
            signing_key: None,
            presign_ttl_secs: default_presign_ttl(),
        }
    }
}

fn default_blob_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_presign_ttl() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_boundary_lookback")]
    pub boundary_lookback: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            boundary_lookback: default_boundary_lookback(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_boundary_lookback() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_flat_scan_threshold")]
    pub flat_scan_threshold: usize,
    #[serde(default = "default_ann_m")]
    pub ann_m: usize,
    #[serde(default = "default_ann_ef_construction")]
    pub ann_ef_construction: usize,
    #[serde(default = "default_ann_ef_search")]
    pub ann_ef_search: usize,
    /// Upper bound on memory held by cached per-scope indexes.
    #[serde(default = "default_index_cache_bytes")]
    pub index_cache_bytes: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_turns: default_history_turns(),
            flat_scan_threshold: default_flat_scan_threshold(),
            ann_m: default_ann_m(),
            ann_ef_construction: default_ann_ef_construction(),
            ann_ef_search: default_ann_ef_search(),
            index_cache_bytes: default_index_cache_bytes(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_history_turns() -> usize {
    10
}
fn default_flat_scan_threshold() -> usize {
    512
}
fn default_ann_m() -> usize {
    16
}
fn default_ann_ef_construction() -> usize {
    200
}
fn default_ann_ef_search() -> usize {
    64
}
fn default_index_cache_bytes() -> usize {
    256 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    96
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    700
}
fn default_completion_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted request body. Uploads arrive base64-encoded, so this
    /// must cover roughly 4/3 of the biggest source file.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if chunking.overlap >= chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            chunking.overlap,
            chunking.chunk_size
        );
    }

    let retrieval = &config.retrieval;
    if retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.ann_m < 2 {
        anyhow::bail!("retrieval.ann_m must be >= 2");
    }
    if retrieval.ann_ef_construction < 1 || retrieval.ann_ef_search < 1 {
        anyhow::bail!("retrieval.ann_ef_construction and ann_ef_search must be >= 1");
    }

    let embedding = &config.embedding;
    if embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }
    match embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" | "ollama" => {
            if embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hashing.",
            other
        ),
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    let completion = &config.completion;
    match completion.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if completion.model.is_none() {
                anyhow::bail!("completion.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }
    if !(completion.top_p > 0.0 && completion.top_p <= 1.0) {
        anyhow::bail!("completion.top_p must be in (0.0, 1.0]");
    }

    Ok(())
}
