//! Loader boundary: anything that yields [`Document`]s can feed ingestion.
//!
//! [`DirectoryLoader`] covers UTF-8 text formats. Binary formats (PDF,
//! DOCX, PPTX) are left to external loaders implementing
//! [`DocumentLoader`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunking::char_len;
use crate::document::Document;
use crate::error::{RagError, Result};

/// Extensions read by [`DirectoryLoader`], lowercase with the leading dot.
pub const TEXT_EXTENSIONS: [&str; 6] = [".txt", ".md", ".csv", ".eml", ".json", ".html"];

/// A source of documents for the ingestion pipeline.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document this loader knows about.
    async fn load(&self) -> Result<Vec<Document>>;
}

/// Already-loaded documents, handed through unchanged.
#[async_trait]
impl DocumentLoader for Vec<Document> {
    async fn load(&self) -> Result<Vec<Document>> {
        Ok(self.clone())
    }
}

/// Loads supported text files from a directory.
///
/// Each document carries `source` (the file path), `file_type` (lowercase
/// extension with the dot, e.g. `.md`), and `original_filename`. Files that
/// cannot be read as UTF-8 are skipped with a warning.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    recursive: bool,
}

impl DirectoryLoader {
    /// Load files directly inside `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), recursive: false }
    }

    /// Also descend into subdirectories.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Supported files under the root, sorted by path.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(RagError::LoaderError(format!(
                "directory not found: {}",
                self.root.display()
            )));
        }
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files = WalkDir::new(&self.root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| file_type(entry.path()).is_some_and(|ext| is_supported(&ext)))
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        let files = self.discover()?;
        let mut documents = Vec::with_capacity(files.len());
        let mut skipped = 0;

        for path in &files {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    skipped += 1;
                    continue;
                }
            };
            if content.trim().is_empty() {
                warn!(path = %path.display(), "skipping empty file");
                skipped += 1;
                continue;
            }
            documents.push(document_for(path, content));
        }

        info!(
            directory = %self.root.display(),
            loaded = documents.len(),
            skipped,
            "loaded documents"
        );
        if documents.is_empty() {
            return Err(RagError::LoaderError(format!(
                "no readable documents in {}",
                self.root.display()
            )));
        }
        Ok(documents)
    }
}

fn document_for(path: &Path, content: String) -> Document {
    let mut document = Document::new(content).with_metadata("source", path.display().to_string());
    if let Some(ext) = file_type(path) {
        document = document.with_metadata("file_type", ext);
    }
    if let Some(name) = path.file_name() {
        document = document.with_metadata("original_filename", name.to_string_lossy().into_owned());
    }
    document
}

/// Lowercase extension with its leading dot.
pub fn file_type(path: &Path) -> Option<String> {
    path.extension().map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

pub fn is_supported(file_type: &str) -> bool {
    TEXT_EXTENSIONS.contains(&file_type)
}

/// Counts and sizes over a loaded document set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub total_documents: usize,
    pub file_types: BTreeMap<String, usize>,
    pub total_characters: usize,
    pub average_doc_length: usize,
}

impl DocumentSummary {
    pub fn of(documents: &[Document]) -> Self {
        let mut file_types = BTreeMap::new();
        for document in documents {
            let kind = document
                .metadata
                .get("file_type")
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            *file_types.entry(kind).or_default() += 1;
        }
        let total_characters = documents.iter().map(|d| char_len(&d.content)).sum();
        Self {
            total_documents: documents.len(),
            file_types,
            total_characters,
            average_doc_length: total_characters.checked_div(documents.len()).unwrap_or(0),
        }
    }
}
