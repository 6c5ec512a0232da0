//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a non-persistent store
//! backed by a `Vec` protected by a `tokio::sync::RwLock`. It is suitable
//! for development, testing, and small corpora that are re-ingested on start.

use std::collections::HashSet;
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::document::{SearchResult, StoredRecord};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, DeleteResult, DistanceMetric, MetadataFilter, VectorStore, VectorStoreStats,
    check_query, rank_records,
};

#[derive(Debug, Default)]
struct Collection {
    records: Vec<StoredRecord>,
    /// Ids present in `records`.
    ids: HashSet<String>,
    dimensions: Option<usize>,
}

/// An in-memory vector store bound to one collection.
///
/// Records are kept in insertion order; search is a brute-force scan.
///
/// # Example
///
/// ```rust,ignore
/// use localrag::{DistanceMetric, InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::with_metric("docs", DistanceMetric::Cosine);
/// store.add(records, 32).await?;
/// ```
#[derive(Debug)]
pub struct InMemoryVectorStore {
    name: String,
    metric: DistanceMetric,
    created_at: DateTime<Utc>,
    collection: RwLock<Collection>,
    stats: StdRwLock<VectorStoreStats>,
}

impl InMemoryVectorStore {
    /// Create an empty cosine collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_metric(name, DistanceMetric::Cosine)
    }

    /// Create an empty collection with the given metric.
    pub fn with_metric(name: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            metric,
            created_at: Utc::now(),
            collection: RwLock::new(Collection::default()),
            stats: StdRwLock::new(VectorStoreStats::default()),
        }
    }

    fn update_stats(&self, update: impl FnOnce(&VectorStoreStats) -> VectorStoreStats) {
        let mut guard = match self.stats.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = update(&guard);
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn insert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        let mut collection = self.collection.write().await;

        // Check the whole batch before touching the collection.
        let expected = collection
            .dimensions
            .or_else(|| records.first().map(|r| r.embedding.len()))
            .unwrap_or_default();
        let mut batch_ids = HashSet::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != expected {
                return Err(RagError::DimensionMismatch { expected, actual: record.embedding.len() });
            }
            if collection.ids.contains(&record.id) || !batch_ids.insert(record.id.as_str()) {
                return Err(RagError::VectorStoreError {
                    backend: "InMemory".to_string(),
                    message: format!("record id '{}' already exists", record.id),
                });
            }
        }

        if !records.is_empty() {
            collection.dimensions = Some(expected);
        }
        collection.ids.extend(records.iter().map(|r| r.id.clone()));
        collection.records.extend_from_slice(records);
        drop(collection);

        self.update_stats(|s| s.record_batch(records.len()));
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        include_distances: bool,
    ) -> Result<Vec<SearchResult>> {
        let collection = self.collection.read().await;
        check_query(query, top_k, collection.dimensions)?;
        let results =
            rank_records(&collection.records, query, self.metric, top_k, filter, include_distances);
        drop(collection);

        self.update_stats(VectorStoreStats::record_query);
        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>> {
        let collection = self.collection.read().await;
        Ok(collection.records.iter().find(|r| r.id == id).cloned())
    }

    async fn delete(&self, ids: &[&str]) -> Result<DeleteResult> {
        let mut collection = self.collection.write().await;
        let initial = collection.records.len();
        for id in ids {
            collection.ids.remove(*id);
        }
        collection.records.retain(|r| !ids.contains(&r.id.as_str()));
        let remaining = collection.records.len();
        drop(collection);

        let documents_deleted = initial - remaining;
        self.update_stats(|s| s.record_delete(documents_deleted));
        Ok(DeleteResult { documents_deleted, remaining })
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.collection.read().await.records.len())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let collection = self.collection.read().await;
        let footprint_bytes = collection
            .records
            .iter()
            .map(|r| (r.content.len() + r.embedding.len() * std::mem::size_of::<f32>()) as u64)
            .sum();
        let stats = self.stats();
        Ok(CollectionInfo {
            name: self.name.clone(),
            document_count: collection.records.len(),
            storage_path: None,
            distance_metric: self.metric,
            dimensions: collection.dimensions,
            footprint_bytes,
            created_at: self.created_at,
            last_updated: stats.last_updated,
            total_queries: stats.queries_executed,
        })
    }

    fn stats(&self) -> VectorStoreStats {
        match self.stats.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
