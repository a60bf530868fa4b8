//! Embedding providers and the fail-soft [`Embedder`].
//!
//! Providers may fail in any way they like; the [`Embedder`] bounds every call
//! with a timeout and a cancellation token and turns every failure into an
//! absent vector, so callers fall back to structural retrieval.

use async_trait::async_trait;
use engram_core::{EmbeddingConfig, EngramError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Errors raised by embedding providers
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid embedding: {0}")]
    InvalidResponse(String),
}

impl From<EmbeddingError> for EngramError {
    fn from(err: EmbeddingError) -> Self {
        EngramError::embedding_unavailable(err.to_string())
    }
}

/// Identity of the model behind a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            dimension,
        }
    }
}

/// Source of text embeddings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model(&self) -> &EmbeddingModel;

    fn dimension(&self) -> usize {
        self.model().dimension
    }
}

// ============================================================================
// Mock provider
// ============================================================================

/// Deterministic hash-based embeddings for tests and offline use.
///
/// Vectors carry no semantic meaning; identical texts map to identical vectors.
pub struct MockProvider {
    model: EmbeddingModel,
}

impl MockProvider {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self {
        Self {
            model: EmbeddingModel::new("mock", "mock-hash", dimension),
        }
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let hash = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        let mut embedding: Vec<f32> = (0..self.model.dimension)
            .map(|i| {
                let seed = hash.wrapping_add((i as u64).wrapping_mul(2_654_435_761));
                ((seed % 1000) as f32 / 1000.0) - 0.5
            })
            .collect();

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.generate_embedding(text))
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

// ============================================================================
// Ollama provider
// ============================================================================

/// Embeddings from a local Ollama server (`/api/embeddings`)
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: EmbeddingModel,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";
    pub const DEFAULT_MODEL: &'static str = "nomic-embed-text";
    pub const DEFAULT_DIMENSION: usize = 768;

    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let model_name = config.model.as_deref().unwrap_or(Self::DEFAULT_MODEL);
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(Self::DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();

        info!("Initialized Ollama provider with model: {}", model_name);

        Ok(Self {
            client,
            endpoint,
            model: EmbeddingModel::new(
                "ollama",
                model_name,
                config.dimension.unwrap_or(Self::DEFAULT_DIMENSION),
            ),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Generating embedding with Ollama");

        let request = OllamaRequest {
            model: &self.model.model_name,
            prompt: text,
        };

        let url = format!("{}/api/embeddings", self.endpoint);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(EmbeddingError::Provider(format!(
                "Ollama API error: {}",
                error_text
            )));
        }

        let response: OllamaResponse = response.json().await?;
        Ok(response.embedding)
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

// ============================================================================
// OpenAI provider
// ============================================================================

/// Embeddings from the OpenAI embeddings API
pub struct OpenAIProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: EmbeddingModel,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1/embeddings";
    pub const DEFAULT_MODEL: &'static str = "text-embedding-3-small";

    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EmbeddingError::Config("OpenAI API key not configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let model_name = config.model.as_deref().unwrap_or(Self::DEFAULT_MODEL);
        let dimension = config.dimension.unwrap_or(match model_name {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        });

        info!("Initialized OpenAI provider with model: {}", model_name);

        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            api_key,
            model: EmbeddingModel::new("openai", model_name, dimension),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Generating embedding with OpenAI");

        let request = OpenAIRequest {
            input: vec![text],
            model: &self.model.model_name,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(EmbeddingError::Provider(format!(
                "OpenAI API error: {}",
                error_text
            )));
        }

        let response: OpenAIResponse = response.json().await?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding returned".to_string()))
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

/// Build the provider named in `config`; `none` yields no provider
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.to_lowercase().as_str() {
        "none" => return Ok(None),
        "mock" => Arc::new(MockProvider::new(
            config.dimension.unwrap_or(MockProvider::DEFAULT_DIMENSION),
        )),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        other => {
            return Err(EmbeddingError::Config(format!(
                "Unknown embedding provider: {}",
                other
            )));
        }
    };
    Ok(Some(provider))
}

// ============================================================================
// Fail-soft wrapper
// ============================================================================

/// Bounded, never-failing access to an optional embedding provider
#[derive(Clone)]
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Embedder {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// An embedder that always reports "unavailable"
    pub fn disabled() -> Self {
        Self {
            provider: None,
            timeout: Self::DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Build from configuration. A provider that cannot be built is logged
    /// and replaced by a disabled embedder.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        match build_provider(config) {
            Ok(Some(provider)) => Self::new(provider, timeout),
            Ok(None) => Self {
                timeout,
                ..Self::disabled()
            },
            Err(e) => {
                warn!("Embedding provider '{}' unavailable: {}", config.provider, e);
                Self {
                    timeout,
                    ..Self::disabled()
                }
            }
        }
    }

    /// Share an external cancellation token (e.g. process shutdown)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn model(&self) -> Option<&EmbeddingModel> {
        self.provider.as_ref().map(|provider| provider.model())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Embed `text`, reporting why no vector was produced.
    ///
    /// Fails with [`EngramError::EmbeddingUnavailable`] on empty input, a
    /// missing provider, provider errors, timeouts and malformed vectors, and
    /// with [`EngramError::Cancelled`] when the token fires.
    pub async fn try_embed(&self, text: &str) -> engram_core::Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EngramError::embedding_unavailable("empty input"));
        }
        let Some(provider) = &self.provider else {
            return Err(EngramError::embedding_unavailable("no provider configured"));
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(EngramError::cancelled("embedding call cancelled"));
            }
            outcome = tokio::time::timeout(self.timeout, provider.embed(text)) => outcome,
        };

        let embedding = match outcome {
            Err(_) => {
                return Err(EngramError::embedding_unavailable(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
            Ok(result) => result?,
        };

        if embedding.is_empty() || embedding.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} returned an empty or non-finite vector",
                provider.model().provider
            ))
            .into());
        }
        Ok(embedding)
    }

    /// Embed `text`; every failure is logged and becomes `None`
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.try_embed(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                if self.is_available() {
                    warn!("Embedding unavailable, falling back: {}", e);
                } else {
                    debug!("Embedding skipped: {}", e);
                }
                None
            }
        }
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.model())
            .field("timeout", &self.timeout)
            .finish()
    }
}
