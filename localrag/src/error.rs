//! Error types for the `localrag` crate.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`RagError`].
///
/// Orchestrators and callers use the kind to decide how to report a failure
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Empty or invalid input to a stage.
    Input,
    /// Model/collection mismatch or an unsupported setting.
    Configuration,
    /// Read or write failure against the vector store.
    Storage,
    /// Embedding model or generation service failure.
    ExternalService,
}

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A stage received empty input.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A stage received input it cannot process.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Chunking a non-empty document set yielded no chunks.
    #[error("Chunking produced no chunks from {documents} non-empty document(s)")]
    ChunkingProducedNothing {
        /// Number of documents handed to the chunker.
        documents: usize,
    },

    /// Every text in an embedding batch was blank.
    #[error("No valid input remained after filtering blank texts")]
    NoValidInput,

    /// A document loader could not produce documents.
    #[error("Loader error: {0}")]
    LoaderError(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A similarity or distance metric name that is not supported.
    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    /// Vector dimensionality differs from what the model or collection uses.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality fixed by the model or collection.
        expected: usize,
        /// Dimensionality that was supplied.
        actual: usize,
    },

    /// An existing collection was reopened with a different distance metric.
    #[error(
        "Collection '{collection}' was created with metric '{stored}', but '{requested}' was requested"
    )]
    MetricMismatch {
        /// The collection name.
        collection: String,
        /// Metric recorded when the collection was created.
        stored: String,
        /// Metric requested by the caller.
        requested: String,
    },

    /// A sub-batch of an `add` call could not be written.
    #[error("Storage write failed for batch {batch_index}: {message}")]
    StorageWrite {
        /// Zero-based index of the failed sub-batch.
        batch_index: usize,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation or model loading.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The answer-generation service failed or was unreachable.
    #[error("Generation error ({service}): {message}")]
    GenerationError {
        /// The generation service that produced the error.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// An external call did not complete within its timeout.
    #[error("{service} timed out after {timeout:?}")]
    Timeout {
        /// The service that timed out.
        service: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl RagError {
    /// Classify this error into one of the four error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput(_)
            | Self::InvalidInput(_)
            | Self::ChunkingProducedNothing { .. }
            | Self::NoValidInput
            | Self::LoaderError(_) => ErrorKind::Input,
            Self::ConfigError(_)
            | Self::UnsupportedMetric(_)
            | Self::DimensionMismatch { .. }
            | Self::MetricMismatch { .. } => ErrorKind::Configuration,
            Self::StorageWrite { .. } | Self::VectorStoreError { .. } => ErrorKind::Storage,
            Self::EmbeddingError { .. } | Self::GenerationError { .. } | Self::Timeout { .. } => {
                ErrorKind::ExternalService
            }
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(RagError::NoValidInput.kind(), ErrorKind::Input);
        assert_eq!(
            RagError::DimensionMismatch { expected: 3, actual: 4 }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            RagError::StorageWrite { batch_index: 2, message: "disk full".into() }.kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            RagError::Timeout { service: "ollama".into(), timeout: Duration::from_secs(1) }.kind(),
            ErrorKind::ExternalService
        );
    }

    #[test]
    fn storage_write_names_batch() {
        let err = RagError::StorageWrite { batch_index: 3, message: "locked".into() };
        assert_eq!(err.to_string(), "Storage write failed for batch 3: locked");
    }
}
