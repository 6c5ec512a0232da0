//! # localrag
//!
//! Local retrieval-augmented generation: documents are chunked, embedded and
//! stored in a vector collection; questions are embedded, matched against
//! stored chunks, and answered by a local language model with source
//! citations.
//!
//! ## Components
//!
//! - [`RecursiveChunker`] splits text along paragraph, line, sentence,
//!   clause and word boundaries with overlap between chunks.
//! - [`Embedder`] batches, filters and normalizes calls to an
//!   [`EmbeddingProvider`] ([`HashingEmbeddingProvider`] offline, or
//!   `ollama::OllamaEmbeddingProvider`).
//! - [`VectorStore`] persists records and answers nearest-neighbour queries
//!   ([`InMemoryVectorStore`], or `sqlite::SqliteVectorStore`).
//! - [`IngestionPipeline`] drives Load → Chunk → Embed → Store.
//! - [`QueryPipeline`] drives Embed → Retrieve → Assemble → Generate.
//!
//! ## Feature flags
//!
//! | Feature  | Enables |
//! |----------|---------|
//! | `sqlite` | `SqliteVectorStore` (default) |
//! | `ollama` | `OllamaEmbeddingProvider`, `OllamaGenerator` |
//! | `full`   | both |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use localrag::*;
//!
//! let config = RagConfig::default();
//! let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new("docs"));
//! let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider::default());
//!
//! let ingestion = IngestionPipeline::builder()
//!     .config(config.clone())
//!     .embedding_provider(provider.clone())
//!     .vector_store(store.clone())
//!     .build()?;
//! let report = ingestion.run(&DirectoryLoader::new("./data")).await;
//! ```

pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod inmemory;
pub mod ingest;
pub mod loader;
pub mod query;
pub mod vectorstore;

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chunking::{
    ChunkSummary, ChunkValidation, Chunker, ChunkerStats, DEFAULT_SEPARATORS, RecursiveChunker,
};
pub use config::{RagConfig, RagConfigBuilder};
pub use context::{AssembledContext, SourceCitation, assemble_context};
pub use document::{
    Chunk, Document, EmbeddedChunk, Metadata, MetadataValue, NewRecord, SearchResult, StoredRecord,
    flatten_metadata,
};
pub use embedding::{
    Embedder, EmbedderStats, EmbeddingProvider, EmbeddingSummary, EmbeddingValidation, ModelInfo,
    RankedMatch, SimilarityMetric, rank_by_similarity, similarity, validate_embeddings,
};
pub use error::{ErrorKind, RagError, Result};
pub use generation::{
    AnswerGenerator, GenerationOptions, GenerationRequest, build_prompt, generate_with_timeout,
};
pub use hashing::HashingEmbeddingProvider;
pub use ingest::{IngestStage, IngestionPipeline, IngestionReport, IngestionStats, StageStats};
pub use inmemory::InMemoryVectorStore;
pub use loader::{DirectoryLoader, DocumentLoader, DocumentSummary};
pub use query::{QueryAnswer, QueryFailure, QueryPipeline, QueryResult, QueryStage, QueryStats};
pub use vectorstore::{
    AddResult, CollectionInfo, DeleteResult, DistanceMetric, MetadataFilter, VectorStore,
    VectorStoreStats,
};
