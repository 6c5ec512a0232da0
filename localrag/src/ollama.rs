//! Ollama embedding provider and answer generator.
//!
//! This module is only available when the `ollama` feature is enabled. Both
//! types talk to a local Ollama server over its HTTP API: `/api/embed` for
//! embeddings, `/api/generate` for completions, and `/api/tags` to list the
//! installed models.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{
    AnswerGenerator, DEFAULT_GENERATION_MODEL, DEFAULT_GENERATION_TIMEOUT, GenerationRequest,
};

const PROVIDER: &str = "Ollama";

/// Connection settings for a local Ollama server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }
}

impl OllamaConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder().timeout(self.timeout).build().map_err(|e| {
            RagError::ConfigError(format!("failed to build HTTP client: {e}"))
        })
    }
}

// ── Ollama API request/response types ──────────────────────────────

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Names of the models installed on the server.
async fn list_models(client: &reqwest::Client, config: &OllamaConfig) -> reqwest::Result<Vec<String>> {
    let tags: TagsResponse =
        client.get(config.endpoint("api/tags")).send().await?.error_for_status()?.json().await?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// `all-minilm` matches an installed `all-minilm:latest`.
fn model_installed(installed: &[String], model: &str) -> bool {
    installed
        .iter()
        .any(|name| name == model || name.split_once(':').is_some_and(|(base, _)| base == model))
}

/// An [`EmbeddingProvider`] backed by a local Ollama server.
///
/// The model is checked and its dimensionality probed once at
/// construction; failures there are fatal.
///
/// # Example
///
/// ```rust,ignore
/// use localrag::ollama::{OllamaConfig, OllamaEmbeddingProvider};
///
/// let provider = OllamaEmbeddingProvider::connect(&OllamaConfig::default()).await?;
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Debug)]
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    config: OllamaConfig,
    dimensions: usize,
}

impl OllamaEmbeddingProvider {
    /// Connect to the server, verify the embedding model is installed, and
    /// learn its output dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the server is unreachable, the
    /// model is missing, or the probe returns no vector.
    pub async fn connect(config: &OllamaConfig) -> Result<Self> {
        let client = config.client()?;
        let installed = list_models(&client, config).await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "server unreachable");
            RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("cannot reach {}: {e}", config.base_url),
            }
        })?;
        if !model_installed(&installed, &config.embedding_model) {
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!(
                    "embedding model '{}' is not installed (run `ollama pull {}`)",
                    config.embedding_model, config.embedding_model
                ),
            });
        }

        let mut provider = Self { client, config: config.clone(), dimensions: 0 };
        let probe = provider.request_embeddings(&["dimension probe"]).await?;
        provider.dimensions = probe.first().map(Vec::len).unwrap_or_default();
        if provider.dimensions == 0 {
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: "probe returned an empty embedding".into(),
            });
        }

        info!(model = %config.embedding_model, dimensions = provider.dimensions, "loaded embedding model");
        Ok(provider)
    }

    async fn request_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest { model: &self.config.embedding_model, input: texts.to_vec() };
        let response = self
            .client
            .post(self.config.endpoint("api/embed"))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, &self.config))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(provider = PROVIDER, %status, "embedding request rejected");
            return Err(RagError::EmbeddingError {
                provider: PROVIDER.into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| RagError::EmbeddingError {
            provider: PROVIDER.into(),
            message: format!("failed to parse response: {e}"),
        })?;
        Ok(parsed.embeddings)
    }
}

fn request_error(e: reqwest::Error, config: &OllamaConfig) -> RagError {
    if e.is_timeout() {
        return RagError::Timeout { service: PROVIDER.into(), timeout: config.timeout };
    }
    RagError::EmbeddingError { provider: PROVIDER.into(), message: format!("request failed: {e}") }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::EmbeddingError {
            provider: PROVIDER.into(),
            message: "server returned no embedding".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.config.embedding_model, "embedding batch");
        self.request_embeddings(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

/// An [`AnswerGenerator`] calling Ollama's `/api/generate` without streaming.
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaGenerator {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        Ok(Self { client: config.client()?, config: config.clone() })
    }

    /// Whether the server answers and has `model` installed.
    ///
    /// Unreachable servers report `false`; this never errors.
    pub async fn is_available(&self, model: &str) -> bool {
        match list_models(&self.client, &self.config).await {
            Ok(installed) => {
                let found = model_installed(&installed, model);
                if !found {
                    warn!(model, "generation model not installed");
                }
                found
            }
            Err(e) => {
                warn!(error = %e, base_url = %self.config.base_url, "generation service unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_predict: request.options.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.config.endpoint("api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Timeout { service: PROVIDER.into(), timeout: self.config.timeout }
                } else {
                    RagError::GenerationError {
                        service: PROVIDER.into(),
                        message: format!("failed to generate response: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationError {
                service: PROVIDER.into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| RagError::GenerationError {
                service: PROVIDER.into(),
                message: format!("failed to parse response: {e}"),
            })?;
        Ok(parsed.response)
    }

    fn service_name(&self) -> &str {
        PROVIDER
    }
}
