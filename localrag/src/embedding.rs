//! Embedding generation.
//!
//! [`EmbeddingProvider`] is the backend seam (Ollama, the offline hashing
//! provider, test doubles). [`Embedder`] wraps a provider with the batching,
//! blank-input filtering, normalization, and bookkeeping the pipelines rely
//! on. The free functions compare and check vectors independently of any
//! provider.

use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::document::{Chunk, EmbeddedChunk};
use crate::error::{RagError, Result};
use crate::vectorstore::{dot, norm};

/// Allowed deviation from unit norm for normalized vectors.
pub const NORM_TOLERANCE: f32 = 0.1;

/// A provider that generates vector embeddings from text input.
///
/// The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use localrag::EmbeddingProvider;
///
/// let provider = HashingEmbeddingProvider::new(384);
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model.
    fn model_name(&self) -> &str;

    /// Short name of the backend, used in logs and model info.
    fn provider_name(&self) -> &str {
        "custom"
    }
}

/// Model description captured when the [`Embedder`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub provider: String,
    pub dimensions: usize,
    pub normalize: bool,
    pub batch_size: usize,
}

/// Running totals for an [`Embedder`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbedderStats {
    pub texts_processed: usize,
    pub batches_processed: usize,
    pub total_processing_time: Duration,
    pub average_time_per_text: Duration,
}

impl EmbedderStats {
    /// Snapshot including one more `embed_batch` call.
    pub fn record(&self, texts: usize, batches: usize, elapsed: Duration) -> Self {
        let texts_processed = self.texts_processed + texts;
        let total_processing_time = self.total_processing_time + elapsed;
        let average_time_per_text = u32::try_from(texts_processed)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| total_processing_time / n)
            .unwrap_or_default();
        Self {
            texts_processed,
            batches_processed: self.batches_processed + batches,
            total_processing_time,
            average_time_per_text,
        }
    }
}

/// Batched, normalizing front end to an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    info: ModelInfo,
    stats: RwLock<EmbedderStats>,
}

impl Embedder {
    /// Wrap `provider`, embedding in sub-batches of `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `batch_size` is zero or the
    /// provider reports zero dimensions.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, normalize: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".into()));
        }
        if provider.dimensions() == 0 {
            return Err(RagError::ConfigError(format!(
                "embedding model '{}' reports zero dimensions",
                provider.model_name()
            )));
        }
        let info = ModelInfo {
            model_name: provider.model_name().to_string(),
            provider: provider.provider_name().to_string(),
            dimensions: provider.dimensions(),
            normalize,
            batch_size,
        };
        Ok(Self { provider, info, stats: RwLock::new(EmbedderStats::default()) })
    }

    /// Build from the batching and normalization fields of a [`RagConfig`].
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Result<Self> {
        Self::new(provider, config.batch_size, config.normalize_embeddings)
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn dimensions(&self) -> usize {
        self.info.dimensions
    }

    /// Embed every non-blank text, in input order.
    ///
    /// Blank texts are dropped before encoding, so the output has one vector
    /// per retained text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NoValidInput`] if every text is blank, and
    /// [`RagError::DimensionMismatch`] if the provider returns a vector of
    /// the wrong length.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let valid: Vec<&str> = texts.iter().copied().filter(|t| !t.trim().is_empty()).collect();
        if valid.is_empty() {
            return Err(RagError::NoValidInput);
        }
        if valid.len() < texts.len() {
            warn!(dropped = texts.len() - valid.len(), "dropped blank texts before embedding");
        }

        let start = Instant::now();
        let mut vectors = Vec::with_capacity(valid.len());
        let mut batches = 0;
        for batch in valid.chunks(self.info.batch_size) {
            let embedded = self.provider.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingError {
                    provider: self.info.provider.clone(),
                    message: format!(
                        "expected {} embeddings, received {}",
                        batch.len(),
                        embedded.len()
                    ),
                });
            }
            for vector in embedded {
                if vector.len() != self.info.dimensions {
                    return Err(RagError::DimensionMismatch {
                        expected: self.info.dimensions,
                        actual: vector.len(),
                    });
                }
                vectors.push(if self.info.normalize { normalize(vector) } else { vector });
            }
            batches += 1;
        }

        let elapsed = start.elapsed();
        self.update_stats(|s| s.record(vectors.len(), batches, elapsed));
        debug!(
            model = %self.info.model_name,
            count = vectors.len(),
            batches,
            elapsed_ms = elapsed.as_millis() as u64,
            "embedded texts"
        );
        Ok(vectors)
    }

    /// Embed a single query string.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if `text` is blank.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyInput("cannot embed blank text".into()));
        }
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or(RagError::NoValidInput)
    }

    /// Embed chunk contents and attach model details to each chunk.
    ///
    /// Blank chunks are skipped. Each result's metadata gains
    /// `embedding_model`, `embedding_dimensions`, `embedding_normalized`, and
    /// `document_index` (position among the embedded chunks).
    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddedChunk>> {
        let valid: Vec<&Chunk> = chunks.iter().filter(|c| !c.content.trim().is_empty()).collect();
        if valid.is_empty() {
            return Err(RagError::NoValidInput);
        }
        let texts: Vec<&str> = valid.iter().map(|c| c.content.as_str()).collect();
        let vectors = self.embed_batch(&texts).await?;

        Ok(valid
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, embedding))| {
                let mut chunk = chunk.clone();
                chunk.metadata.insert("embedding_model".into(), self.info.model_name.clone().into());
                chunk.metadata.insert("embedding_dimensions".into(), embedding.len().into());
                chunk.metadata.insert("embedding_normalized".into(), self.info.normalize.into());
                chunk.metadata.insert("document_index".into(), index.into());
                EmbeddedChunk {
                    chunk,
                    dimensions: embedding.len(),
                    embedding,
                    model: self.info.model_name.clone(),
                    normalized: self.info.normalize,
                }
            })
            .collect())
    }

    /// Validate vectors against this embedder's normalization setting.
    pub fn validate(&self, vectors: &[Vec<f32>]) -> EmbeddingValidation {
        validate_embeddings(vectors, self.info.normalize)
    }

    pub fn summary(&self, vectors: &[Vec<f32>]) -> EmbeddingSummary {
        EmbeddingSummary::of(vectors)
    }

    pub fn stats(&self) -> EmbedderStats {
        match self.stats.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_stats(&self, update: impl FnOnce(&EmbedderStats) -> EmbedderStats) {
        let mut guard = match self.stats.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = update(&guard);
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Scale `vector` to unit L2 norm. Zero vectors are returned unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let n = norm(&vector);
    if n > 0.0 {
        vector.iter_mut().for_each(|x| *x /= n);
    }
    vector
}

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine of the angle; equal to the dot product for unit vectors.
    #[default]
    Cosine,
    /// Raw dot product.
    Dot,
}

impl FromStr for SimilarityMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dot_product" => Ok(Self::Dot),
            other => Err(RagError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// Similarity between two vectors of equal length.
///
/// # Errors
///
/// Returns [`RagError::DimensionMismatch`] when lengths differ.
pub fn similarity(a: &[f32], b: &[f32], metric: SimilarityMetric) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    let d = dot(a, b);
    Ok(match metric {
        SimilarityMetric::Dot => d,
        SimilarityMetric::Cosine => {
            let denom = norm(a) * norm(b);
            if denom == 0.0 { 0.0 } else { d / denom }
        }
    })
}

/// One entry of [`rank_by_similarity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedMatch {
    /// Position in the candidate list.
    pub index: usize,
    pub similarity: f32,
}

/// Rank candidates by cosine similarity to `query`, most similar first.
///
/// Ties keep candidate order. At most `top_k` entries are returned.
pub fn rank_by_similarity(query: &[f32], candidates: &[Vec<f32>], top_k: usize) -> Result<Vec<RankedMatch>> {
    let mut ranked = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            similarity(query, candidate, SimilarityMetric::Cosine)
                .map(|similarity| RankedMatch { index, similarity })
        })
        .collect::<Result<Vec<_>>>()?;
    ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    ranked.truncate(top_k);
    Ok(ranked)
}

/// Outcome of [`validate_embeddings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddingValidation {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub count: usize,
    pub dimensions: Option<usize>,
}

/// Check a batch of vectors for numeric faults.
///
/// An empty batch or any NaN or infinite component is a hard failure.
/// All-zero vectors, norms more than [`NORM_TOLERANCE`] away from 1.0 when
/// `normalized` is set, and bitwise duplicates are warnings.
pub fn validate_embeddings(vectors: &[Vec<f32>], normalized: bool) -> EmbeddingValidation {
    let mut report = EmbeddingValidation {
        is_valid: true,
        count: vectors.len(),
        dimensions: vectors.first().map(Vec::len),
        ..Default::default()
    };
    if vectors.is_empty() {
        report.is_valid = false;
        report.issues.push("No embeddings provided".to_string());
        return report;
    }

    if vectors.iter().flatten().any(|x| x.is_nan()) {
        report.is_valid = false;
        report.issues.push("Embeddings contain NaN values".to_string());
    }
    if vectors.iter().flatten().any(|x| x.is_infinite()) {
        report.is_valid = false;
        report.issues.push("Embeddings contain infinite values".to_string());
    }

    let zero = vectors.iter().filter(|v| v.iter().all(|x| *x == 0.0)).count();
    if zero > 0 {
        report.warnings.push(format!("{zero} embeddings are all zeros"));
    }

    if normalized {
        let off = vectors
            .iter()
            .filter(|v| (norm(v) - 1.0).abs() > NORM_TOLERANCE)
            .count();
        if off > 0 {
            report.warnings.push(format!("{off} embeddings deviate from unit norm"));
        }
    }

    let mut bits: Vec<Vec<u32>> =
        vectors.iter().map(|v| v.iter().map(|x| x.to_bits()).collect()).collect();
    bits.sort_unstable();
    bits.dedup();
    let duplicates = vectors.len() - bits.len();
    if duplicates > 0 {
        report.warnings.push(format!("{duplicates} duplicate embeddings found"));
    }

    report
}

/// Norm statistics over a batch of vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddingSummary {
    pub count: usize,
    pub dimensions: usize,
    pub norm_mean: f32,
    pub norm_std: f32,
    pub norm_min: f32,
    pub norm_max: f32,
    pub has_nan: bool,
    pub has_inf: bool,
    pub all_zero_vectors: usize,
}

impl EmbeddingSummary {
    pub fn of(vectors: &[Vec<f32>]) -> Self {
        if vectors.is_empty() {
            return Self::default();
        }
        let norms: Vec<f32> = vectors.iter().map(|v| norm(v)).collect();
        let n = norms.len() as f32;
        let mean = norms.iter().sum::<f32>() / n;
        let variance = norms.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        Self {
            count: vectors.len(),
            dimensions: vectors[0].len(),
            norm_mean: mean,
            norm_std: variance.sqrt(),
            norm_min: norms.iter().copied().fold(f32::INFINITY, f32::min),
            norm_max: norms.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            has_nan: vectors.iter().flatten().any(|x| x.is_nan()),
            has_inf: vectors.iter().flatten().any(|x| x.is_infinite()),
            all_zero_vectors: vectors.iter().filter(|v| v.iter().all(|x| *x == 0.0)).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_leaves_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
        let unit = normalize(vec![3.0, 4.0]);
        assert!((norm(&unit) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_unknown_similarity_metric() {
        assert!(matches!("manhattan".parse::<SimilarityMetric>(), Err(RagError::UnsupportedMetric(_))));
    }

    #[test]
    fn stats_average_over_all_texts() {
        let stats = EmbedderStats::default()
            .record(2, 1, Duration::from_millis(40))
            .record(2, 1, Duration::from_millis(40));
        assert_eq!(stats.texts_processed, 4);
        assert_eq!(stats.average_time_per_text, Duration::from_millis(20));
    }
}
