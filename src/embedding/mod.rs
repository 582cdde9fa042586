//! Embedding model abstraction and implementations.
//!
//! Defines the [`EmbeddingModel`] trait and concrete implementations:
//! - **[`DisabledModel`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIModel`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaModel`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingModel`]**: deterministic feature-hashing vectors, no network.
//!
//! [`Embedder`] wraps a model with the batching policy and the overall
//! deadline that every external call must carry.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] / [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding for SQLite
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama models use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 401/403 → [`EmbedError::AuthMissing`], no retry
//! - Other HTTP 4xx → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod hashing;

pub use hashing::HashingModel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Trait for embedding models.
///
/// `embed_batch` must return one vector per input, in input order.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Whether the model accepts several inputs in one request.
    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Malformed("empty embedding response".to_string()))
    }
}

/// Batching and deadline policy around an [`EmbeddingModel`].
#[derive(Clone)]
pub struct Embedder {
    model: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    deadline: Duration,
}

impl Embedder {
    pub fn new(model: Arc<dyn EmbeddingModel>, batch_size: usize, deadline: Duration) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
            deadline,
        }
    }

    /// Build an embedder from configuration.
    ///
    /// The overall deadline covers every retry attempt of a single call,
    /// including the backoff sleeps between them.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = create_model(config)?;
        let deadline = retry_budget(config.timeout_secs, config.max_retries);
        Ok(Self::new(model, config.batch_size, deadline))
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn dims(&self) -> usize {
        self.model.dims()
    }

    /// Embed a single query string.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self.with_deadline(self.model.embed(text)).await?;
        self.check_dims(&vector)?;
        Ok(vector)
    }

    /// Embed many texts, preserving order.
    ///
    /// Uses batched requests when the model supports them and falls back to
    /// one request per text otherwise.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        if self.model.supports_batch() {
            for batch in texts.chunks(self.batch_size) {
                let vectors = self.with_deadline(self.model.embed_batch(batch)).await?;
                if vectors.len() != batch.len() {
                    return Err(EmbedError::Malformed(format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    )));
                }
                out.extend(vectors);
            }
        } else {
            debug!(model = self.model_name(), "model does not batch; embedding per text");
            for text in texts {
                out.push(self.with_deadline(self.model.embed(text)).await?);
            }
        }
        for vector in &out {
            self.check_dims(vector)?;
        }
        Ok(out)
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, EmbedError>>,
    ) -> Result<T, EmbedError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(EmbedError::Timeout(self.deadline.as_secs())),
        }
    }

    fn check_dims(&self, vector: &[f32]) -> Result<(), EmbedError> {
        if vector.len() != self.dims() {
            return Err(EmbedError::Malformed(format!(
                "expected {}-dimensional embedding, got {}",
                self.dims(),
                vector.len()
            )));
        }
        Ok(())
    }
}

// ============ Disabled Model ============

/// A no-op embedding model that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledModel {
    dims: usize,
}

impl DisabledModel {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI Model ============

/// Embedding model using the OpenAI API.
///
/// Calls `POST {url}/embeddings` with the configured model. The API key is
/// read from `OPENAI_API_KEY`; a missing key surfaces as
/// [`EmbedError::AuthMissing`] on the first call.
pub struct OpenAIModel {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAIModel {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::AuthMissing("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let request = || {
            self.client
                .post(&endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
        };

        let json = send_with_retry("OpenAI", request, self.max_retries).await?;
        parse_openai_response(&json)
    }
}

/// Sleep before retry `attempt` (1-based): 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Worst-case wall time of one provider call: every attempt runs into the
/// request timeout and every backoff sleep is taken.
pub fn retry_budget(timeout_secs: u64, max_retries: u32) -> Duration {
    let attempts = Duration::from_secs(timeout_secs.max(1)) * (max_retries + 1);
    let backoff: Duration = (1..=max_retries).map(backoff_delay).sum();
    attempts + backoff
}

/// Send a request built by `request`, retrying on 429, 5xx, and network errors.
async fn send_with_retry<F>(
    provider: &str,
    request: F,
    max_retries: u32,
) -> Result<serde_json::Value, EmbedError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| EmbedError::Malformed(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} API error {}: {}", provider, status, body_text);

                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(EmbedError::AuthMissing(message));
                }
                if status.as_u16() == 429 {
                    last_err = Some(EmbedError::RateLimited(message));
                    continue;
                }
                if status.is_server_error() {
                    last_err = Some(EmbedError::Transport(message));
                    continue;
                }
                return Err(EmbedError::Malformed(message));
            }
            Err(e) => {
                last_err = Some(EmbedError::Transport(format!(
                    "{} connection error: {}",
                    provider, e
                )));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| EmbedError::Transport(format!("{} embedding failed after retries", provider))))
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts `data[].embedding` and orders the vectors by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Malformed("missing embedding".to_string()))?;
        indexed.push((index, json_floats(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_floats(values: &[serde_json::Value]) -> Result<Vec<f32>, EmbedError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Malformed("non-numeric embedding value".to_string()))
        })
        .collect()
}

// ============ Ollama Model ============

/// Embedding model using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaModel {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaModel {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let request = || self.client.post(&endpoint).json(&body);

        let json = send_with_retry("Ollama", request, self.max_retries).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding
                .as_array()
                .ok_or_else(|| EmbedError::Malformed("embedding is not an array".to_string()))?;
            json_floats(values)
        })
        .collect()
}

/// Create the appropriate [`EmbeddingModel`] based on configuration.
///
/// | Config Value | Model |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledModel`] |
/// | `"openai"` | [`OpenAIModel`] |
/// | `"ollama"` | [`OllamaModel`] |
/// | `"hashing"` | [`HashingModel`] |
pub fn create_model(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "hashing" => Ok(Arc::new(HashingModel::new(config.dims))),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}
