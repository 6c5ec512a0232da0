//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! splits text along the highest-priority boundary that keeps pieces under
//! the configured size and carries an overlap window between adjacent chunks.
//!
//! All sizes are measured in characters (Unicode scalar values), not bytes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::RwLock;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::document::{Chunk, Document, Metadata};
use crate::error::{RagError, Result};

/// Boundary markers tried in order: paragraphs, lines, sentences, clauses,
/// words, and finally single characters.
pub const DEFAULT_SEPARATORS: [&str; 9] = ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " ", ""];

/// Metadata keys every chunk must carry.
pub const REQUIRED_CHUNK_METADATA: [&str; 4] =
    ["chunk_id", "chunk_size", "chunk_overlap", "max_chunk_size"];

/// Value of the `chunking_method` metadata field.
pub const CHUNKING_METHOD: &str = "recursive_character";

/// Chunks shorter than this many characters count as tiny during validation.
const TINY_CHUNK_CHARS: usize = 50;

/// A strategy for splitting documents into chunks.
///
/// `chunk_id`s are assigned in emission order across the whole call, so they
/// are unique within one call but not across calls.
pub trait Chunker: Send + Sync {
    /// Split documents into chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if no document has content and
    /// [`RagError::ChunkingProducedNothing`] if non-empty documents yield no
    /// chunks.
    fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>>;

    /// Check a chunk sequence against this chunker's quality rules.
    fn validate(&self, chunks: &[Chunk]) -> ChunkValidation;
}

/// Outcome of [`Chunker::validate`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChunkValidation {
    /// `false` if any hard issue was found.
    pub is_valid: bool,
    /// Hard failures (empty chunks, missing metadata).
    pub issues: Vec<String>,
    /// Soft findings (oversized chunks, many tiny chunks).
    pub warnings: Vec<String>,
    /// Number of chunks inspected.
    pub chunk_count: usize,
}

/// Counts of chunks by size band.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SizeDistribution {
    /// Chunks under 500 characters.
    pub small: usize,
    /// Chunks of 500 to 800 characters.
    pub medium: usize,
    /// Chunks over 800 characters.
    pub large: usize,
}

/// Descriptive statistics over a chunk sequence.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChunkSummary {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub average_chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub size_distribution: SizeDistribution,
    /// Chunk count per `file_type` metadata value (`unknown` if absent).
    pub file_types: BTreeMap<String, usize>,
    /// Number of distinct `source` values.
    pub distinct_sources: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator_count: usize,
}

/// Running totals for a [`RecursiveChunker`].
///
/// Each chunking call replaces the snapshot with a new value from
/// [`ChunkerStats::record`]; callers only ever see copies.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChunkerStats {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub total_characters: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub average_chunk_size: f64,
}

impl ChunkerStats {
    /// Return a new snapshot that includes one more chunking call.
    pub fn record(&self, documents: usize, chunks: &[Chunk]) -> Self {
        let sizes: Vec<usize> = chunks.iter().map(|c| char_len(&c.content)).collect();
        let chunks_created = self.chunks_created + sizes.len();
        let total_characters = self.total_characters + sizes.iter().sum::<usize>();

        let min_chunk_size = match (self.chunks_created, sizes.iter().min()) {
            (0, Some(min)) => *min,
            (_, Some(min)) => self.min_chunk_size.min(*min),
            (_, None) => self.min_chunk_size,
        };
        let max_chunk_size = sizes.iter().copied().fold(self.max_chunk_size, usize::max);
        let average_chunk_size = if chunks_created == 0 {
            0.0
        } else {
            total_characters as f64 / chunks_created as f64
        };

        Self {
            documents_processed: self.documents_processed + documents,
            chunks_created,
            total_characters,
            min_chunk_size,
            max_chunk_size,
            average_chunk_size,
        }
    }
}

/// Splits text hierarchically along an ordered list of separators.
///
/// The highest-priority separator present in the text is used to cut it into
/// pieces. Pieces shorter than `chunk_size` are packed greedily into chunks;
/// when a chunk closes, leading pieces are dropped until at most
/// `chunk_overlap` characters remain, and those carry into the next chunk.
/// Pieces that are still too long are split again with the remaining
/// separators. The empty separator splits into single characters, so the
/// default list always terminates with chunks no longer than `chunk_size`.
///
/// Separators stay attached to the end of the piece they terminate, and
/// each emitted chunk is trimmed of surrounding whitespace.
///
/// # Example
///
/// ```rust,ignore
/// use localrag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let chunks = chunker.chunk_documents(&documents)?;
/// ```
#[derive(Debug)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    stats: RwLock<ChunkerStats>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` with [`DEFAULT_SEPARATORS`].
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of characters shared between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            stats: RwLock::new(ChunkerStats::default()),
        })
    }

    /// Create a chunker from the chunking fields of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Replace the separator priority list.
    ///
    /// An empty list falls back to character-level splitting.
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let separators: Vec<String> = separators.into_iter().map(Into::into).collect();
        self.separators = if separators.is_empty() { vec![String::new()] } else { separators };
        self
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters carried between adjacent chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// The separator priority list.
    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    /// Split raw text into chunks carrying `metadata`.
    ///
    /// Each chunk additionally records `source_type = "raw_text"`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if `text` is blank.
    pub fn chunk_text(&self, text: &str, metadata: Metadata) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyInput("no text provided for chunking".into()));
        }

        let mut chunks = Vec::new();
        for content in self.split_text(text, &self.separators) {
            let mut chunk = self.make_chunk(chunks.len(), content, &metadata);
            chunk.metadata.insert("source_type".into(), "raw_text".into());
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            return Err(RagError::ChunkingProducedNothing { documents: 1 });
        }
        self.record_stats(1, &chunks);
        Ok(chunks)
    }

    /// Summarize a chunk sequence for reporting.
    pub fn summary(&self, chunks: &[Chunk]) -> ChunkSummary {
        let mut summary = ChunkSummary {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            separator_count: self.separators.len(),
            ..ChunkSummary::default()
        };
        if chunks.is_empty() {
            return summary;
        }

        let sizes: Vec<usize> = chunks.iter().map(|c| char_len(&c.content)).collect();
        let mut sources = BTreeSet::new();
        for chunk in chunks {
            let file_type = chunk
                .metadata
                .get("file_type")
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            *summary.file_types.entry(file_type).or_default() += 1;
            let source = chunk
                .metadata
                .get("source")
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            sources.insert(source);
        }

        summary.total_chunks = chunks.len();
        summary.total_characters = sizes.iter().sum();
        summary.average_chunk_size = summary.total_characters / chunks.len();
        summary.min_chunk_size = sizes.iter().copied().min().unwrap_or(0);
        summary.max_chunk_size = sizes.iter().copied().max().unwrap_or(0);
        summary.size_distribution = SizeDistribution {
            small: sizes.iter().filter(|&&s| s < 500).count(),
            medium: sizes.iter().filter(|&&s| (500..=800).contains(&s)).count(),
            large: sizes.iter().filter(|&&s| s > 800).count(),
        };
        summary.distinct_sources = sources.len();
        summary
    }

    /// Snapshot of the running statistics.
    pub fn stats(&self) -> ChunkerStats {
        match self.stats.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record_stats(&self, documents: usize, chunks: &[Chunk]) {
        let mut guard = match self.stats.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = guard.record(documents, chunks);
    }

    fn make_chunk(&self, chunk_id: usize, content: String, inherited: &Metadata) -> Chunk {
        let mut metadata = inherited.clone();
        metadata.insert("chunk_id".into(), chunk_id.into());
        metadata.insert("chunk_size".into(), char_len(&content).into());
        metadata.insert("chunking_method".into(), CHUNKING_METHOD.into());
        metadata.insert("chunk_overlap".into(), self.chunk_overlap.into());
        metadata.insert("max_chunk_size".into(), self.chunk_size.into());
        Chunk { chunk_id, content, metadata }
    }

    /// Split `text` with the first separator it contains, recursing into
    /// oversized pieces with the lower-priority separators.
    fn split_text(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge_pieces(&fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_text(piece, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge_pieces(&fitting));
        }
        chunks
    }

    /// Greedily pack pieces into chunks of at most `chunk_size` characters,
    /// carrying up to `chunk_overlap` trailing characters into the next chunk.
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }
        push_joined(&mut chunks, &window);
        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        if documents.is_empty() {
            return Err(RagError::EmptyInput("no documents provided for chunking".into()));
        }

        let mut chunks = Vec::new();
        let mut non_empty = 0;
        for document in documents {
            if document.content.trim().is_empty() {
                warn!(source = document.source().unwrap_or("unknown"), "skipping empty document");
                continue;
            }
            non_empty += 1;
            for content in self.split_text(&document.content, &self.separators) {
                chunks.push(self.make_chunk(chunks.len(), content, &document.metadata));
            }
        }

        if non_empty == 0 {
            return Err(RagError::EmptyInput("all documents have empty content".into()));
        }
        if chunks.is_empty() {
            return Err(RagError::ChunkingProducedNothing { documents: non_empty });
        }

        self.record_stats(non_empty, &chunks);
        debug!(documents = non_empty, chunk_count = chunks.len(), "chunked documents");
        Ok(chunks)
    }

    fn validate(&self, chunks: &[Chunk]) -> ChunkValidation {
        let mut report = ChunkValidation { is_valid: true, chunk_count: chunks.len(), ..Default::default() };
        if chunks.is_empty() {
            report.is_valid = false;
            report.issues.push("No chunks produced".to_string());
            return report;
        }

        let empty: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.content.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        if !empty.is_empty() {
            report.is_valid = false;
            report.issues.push(format!("Empty chunks found at indices: {empty:?}"));
        }

        let limit = self.chunk_size as f64 * 1.1;
        let oversized: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| char_len(&c.content) as f64 > limit)
            .map(|(i, _)| i)
            .collect();
        if !oversized.is_empty() {
            report.warnings.push(format!("Chunks exceeding target size found at indices: {oversized:?}"));
        }

        let tiny = chunks.iter().filter(|c| char_len(&c.content) < TINY_CHUNK_CHARS).count();
        if tiny as f64 > chunks.len() as f64 * 0.1 {
            report
                .warnings
                .push(format!("Many very small chunks detected ({tiny} out of {})", chunks.len()));
        }

        let missing: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| REQUIRED_CHUNK_METADATA.iter().any(|key| !c.metadata.contains_key(*key)))
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            report.is_valid = false;
            report.issues.push(format!("Chunks missing required metadata at indices: {missing:?}"));
        }

        report
    }
}

/// Join the window into one chunk, dropping it if only whitespace remains.
fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split text at a separator while keeping the separator attached to the
/// preceding segment. The empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }

    let mut result = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_stays_with_preceding_piece() {
        assert_eq!(split_keeping_separator("a. b. c", ". "), vec!["a. ", "b. ", "c"]);
    }

    #[test]
    fn empty_separator_splits_multibyte_characters() {
        assert_eq!(split_keeping_separator("añb", ""), vec!["a", "ñ", "b"]);
    }

    #[test]
    fn merge_carries_overlap_window() {
        let chunker = RecursiveChunker::new(10, 4).unwrap();
        let chunks = chunker.merge_pieces(&["aa ", "bb ", "cc ", "dd ", "ee"]);
        assert_eq!(chunks, vec!["aa bb cc", "cc dd ee"]);
    }

    #[test]
    fn stats_snapshot_accumulates() {
        let chunker = RecursiveChunker::new(20, 5).unwrap();
        chunker.chunk_text("short text", Metadata::new()).unwrap();
        chunker.chunk_text("another short one", Metadata::new()).unwrap();

        let stats = chunker.stats();
        assert_eq!(stats.documents_processed, 2);
        assert_eq!(stats.chunks_created, 2);
        assert_eq!(stats.min_chunk_size, 10);
        assert_eq!(stats.max_chunk_size, 17);
    }
}
