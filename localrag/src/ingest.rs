//! Ingestion orchestrator.
//!
//! [`IngestionPipeline`] drives Load → Chunk → Embed → Store strictly in
//! order. The first failing stage ends the run; the returned
//! [`IngestionReport`] names it and keeps the statistics gathered so far.
//! Nothing is written to the store unless every earlier stage succeeded.
//!
//! # Example
//!
//! ```rust,ignore
//! use localrag::{DirectoryLoader, IngestionPipeline, RagConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .vector_store(Arc::new(store))
//!     .build()?;
//!
//! let report = pipeline.run(&DirectoryLoader::new("./data")).await;
//! assert!(report.success);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, EmbeddedChunk, NewRecord};
use crate::embedding::{Embedder, EmbeddingProvider, EmbeddingSummary};
use crate::error::{ErrorKind, RagError, Result};
use crate::loader::{DocumentLoader, DocumentSummary};
use crate::vectorstore::{CollectionInfo, VectorStore};

/// Stages of an ingestion run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Load,
    Chunk,
    Embed,
    Store,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Store => "store",
        })
    }
}

/// Timing and output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStats {
    pub stage: IngestStage,
    pub duration: Duration,
    pub output_count: usize,
    pub success: bool,
}

/// Statistics for one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionStats {
    pub stages: Vec<StageStats>,
    pub documents_loaded: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub documents_stored: usize,
    pub total_processing_time: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub document_summary: Option<DocumentSummary>,
    pub embedding_summary: Option<EmbeddingSummary>,
}

impl IngestionStats {
    fn new() -> Self {
        Self {
            stages: Vec::new(),
            documents_loaded: 0,
            chunks_created: 0,
            embeddings_generated: 0,
            documents_stored: 0,
            total_processing_time: Duration::ZERO,
            started_at: Utc::now(),
            finished_at: None,
            document_summary: None,
            embedding_summary: None,
        }
    }

    /// Record a finished stage and tag its error with the stage.
    fn finish<T>(
        &mut self,
        stage: IngestStage,
        started: Instant,
        result: Result<T>,
        count: impl FnOnce(&T) -> usize,
    ) -> std::result::Result<T, (IngestStage, RagError)> {
        let output_count = result.as_ref().map(count).unwrap_or(0);
        let duration = started.elapsed();
        self.stages.push(StageStats { stage, duration, output_count, success: result.is_ok() });
        debug!(%stage, output_count, elapsed_ms = duration.as_millis() as u64, "stage finished");
        result.map_err(|e| (stage, e))
    }
}

/// The stage that ended a failed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: IngestStage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of [`IngestionPipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionReport {
    pub success: bool,
    pub stats: IngestionStats,
    /// Final collection state; present on success.
    pub collection: Option<CollectionInfo>,
    /// Present on failure.
    pub failure: Option<StageFailure>,
}

/// Drives documents from a [`DocumentLoader`] into a [`VectorStore`].
///
/// Construct one via [`IngestionPipeline::builder()`].
pub struct IngestionPipeline {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<Embedder>,
    vector_store: Arc<dyn VectorStore>,
}

impl IngestionPipeline {
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Run all four stages against `loader`.
    ///
    /// Never returns an error: failures are reported in the
    /// [`IngestionReport`].
    pub async fn run(&self, loader: &dyn DocumentLoader) -> IngestionReport {
        let started = Instant::now();
        let mut stats = IngestionStats::new();
        info!(collection = self.vector_store.collection_name(), "starting ingestion");

        let outcome = self.execute(loader, &mut stats).await;
        stats.total_processing_time = started.elapsed();
        stats.finished_at = Some(Utc::now());

        match outcome {
            Ok(collection) => {
                info!(
                    collection = %collection.name,
                    documents = stats.documents_loaded,
                    chunks = stats.chunks_created,
                    stored = stats.documents_stored,
                    total = collection.document_count,
                    elapsed_ms = stats.total_processing_time.as_millis() as u64,
                    "ingestion completed"
                );
                IngestionReport { success: true, stats, collection: Some(collection), failure: None }
            }
            Err((stage, e)) => {
                error!(%stage, error = %e, "ingestion failed");
                IngestionReport {
                    success: false,
                    stats,
                    collection: None,
                    failure: Some(StageFailure { stage, kind: e.kind(), message: e.to_string() }),
                }
            }
        }
    }

    async fn execute(
        &self,
        loader: &dyn DocumentLoader,
        stats: &mut IngestionStats,
    ) -> std::result::Result<CollectionInfo, (IngestStage, RagError)> {
        let started = Instant::now();
        let loaded = loader.load().await.and_then(|documents| {
            if documents.is_empty() {
                Err(RagError::EmptyInput("loader returned no documents".into()))
            } else {
                Ok(documents)
            }
        });
        let documents = stats.finish(IngestStage::Load, started, loaded, Vec::len)?;
        stats.documents_loaded = documents.len();
        stats.document_summary = Some(DocumentSummary::of(&documents));

        let started = Instant::now();
        let chunked = self.chunker.chunk_documents(&documents);
        let chunks = stats.finish(IngestStage::Chunk, started, chunked, Vec::len)?;
        stats.chunks_created = chunks.len();
        let validation = self.chunker.validate(&chunks);
        for warning in &validation.warnings {
            warn!(warning = %warning, "chunk validation");
        }
        if !validation.is_valid {
            warn!(issues = ?validation.issues, "chunk validation found issues");
        }

        let started = Instant::now();
        let embedded = self.embed_stage(&chunks, stats).await;
        let embedded = stats.finish(IngestStage::Embed, started, embedded, Vec::len)?;
        stats.embeddings_generated = embedded.len();

        let started = Instant::now();
        let records: Vec<NewRecord> = embedded.into_iter().map(NewRecord::from).collect();
        let added = self.vector_store.add(records, self.config.batch_size).await;
        let added = stats.finish(IngestStage::Store, started, added, |r| r.documents_added)?;
        stats.documents_stored = added.documents_added;

        self.vector_store.collection_info().await.map_err(|e| (IngestStage::Store, e))
    }

    async fn embed_stage(
        &self,
        chunks: &[Chunk],
        stats: &mut IngestionStats,
    ) -> Result<Vec<EmbeddedChunk>> {
        let embedded = self.embedder.embed_chunks(chunks).await?;
        let vectors: Vec<Vec<f32>> = embedded.iter().map(|e| e.embedding.clone()).collect();

        stats.embedding_summary = Some(self.embedder.summary(&vectors));
        let validation = self.embedder.validate(&vectors);
        for warning in &validation.warnings {
            warn!(warning = %warning, "embedding validation");
        }
        if !validation.is_valid {
            return Err(RagError::InvalidInput(format!(
                "embedding validation failed: {}",
                validation.issues.join("; ")
            )));
        }
        Ok(embedded)
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// `config`, `embedding_provider` and `vector_store` are required. Without
/// an explicit chunker a [`RecursiveChunker`] is built from the config.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    embedder: Option<Arc<Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl IngestionPipelineBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider; it is wrapped in an [`Embedder`] using the
    /// config's batch size and normalization.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Use an existing [`Embedder`], e.g. one shared with a query pipeline.
    pub fn embedder(mut self, embedder: Arc<Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing or
    /// the chunker cannot be built from the config.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        let embedder = match (self.embedder, self.embedding_provider) {
            (Some(embedder), _) => embedder,
            (None, Some(provider)) => Arc::new(Embedder::from_config(provider, &config)?),
            (None, None) => {
                return Err(RagError::ConfigError("embedding_provider is required".to_string()));
            }
        };
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(RecursiveChunker::from_config(&config)?),
        };

        Ok(IngestionPipeline { config, chunker, embedder, vector_store })
    }
}
