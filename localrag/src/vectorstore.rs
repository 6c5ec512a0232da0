//! Vector store trait for storing and searching vector embeddings.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::document::{Metadata, MetadataValue, NewRecord, SearchResult, StoredRecord};
use crate::error::{ErrorKind, RagError, Result};

/// Distance function recorded on a collection when it is created.
///
/// Smaller distances mean closer vectors under every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`.
    #[default]
    Cosine,
    /// Squared Euclidean distance.
    L2,
    /// `1 - a·b`.
    #[serde(rename = "ip")]
    InnerProduct,
}

impl DistanceMetric {
    /// Canonical name, as stored in collection metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::InnerProduct => "ip",
        }
    }

    /// Distance between two vectors of equal length.
    ///
    /// A zero-magnitude vector is at cosine distance 1.0 from everything.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let dot = dot(a, b);
                let norm_a = norm(a);
                let norm_b = norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::InnerProduct => 1.0 - dot(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            "ip" | "inner_product" => Ok(Self::InnerProduct),
            other => Err(RagError::UnsupportedMetric(other.to_string())),
        }
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Exact-match metadata predicate. A record is eligible only if every
/// filter key is present in its metadata with a matching value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: Metadata,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| metadata.get(key).is_some_and(|actual| actual.matches(expected)))
    }
}

impl From<Metadata> for MetadataFilter {
    fn from(conditions: Metadata) -> Self {
        Self { conditions }
    }
}

/// Outcome of [`VectorStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddResult {
    pub documents_added: usize,
    pub total_documents_after: usize,
}

/// Outcome of [`VectorStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    /// `initial_count - final_count`.
    pub documents_deleted: usize,
    pub remaining: usize,
}

/// Introspection data for one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub document_count: usize,
    /// Directory holding the persisted collection, if any.
    pub storage_path: Option<String>,
    pub distance_metric: DistanceMetric,
    /// Fixed by the first successful write.
    pub dimensions: Option<usize>,
    pub footprint_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub total_queries: u64,
}

/// Running totals for a vector store instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VectorStoreStats {
    pub records_stored: usize,
    pub records_deleted: usize,
    pub queries_executed: u64,
    pub batch_operations: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl VectorStoreStats {
    /// Snapshot after one committed batch of `written` records.
    pub fn record_batch(&self, written: usize) -> Self {
        Self {
            records_stored: self.records_stored + written,
            batch_operations: self.batch_operations + 1,
            last_updated: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Snapshot after one similarity search.
    pub fn record_query(&self) -> Self {
        Self { queries_executed: self.queries_executed + 1, ..self.clone() }
    }

    /// Snapshot after a delete that removed `removed` records.
    pub fn record_delete(&self, removed: usize) -> Self {
        Self {
            records_deleted: self.records_deleted + removed,
            last_updated: Some(Utc::now()),
            ..self.clone()
        }
    }
}

/// A named, metric-bound collection of embedded records with
/// nearest-neighbour search.
///
/// Implementors provide the atomic [`insert_batch`](VectorStore::insert_batch)
/// primitive; the provided [`add`](VectorStore::add) handles id assignment,
/// dimension checks, and sub-batching on top of it.
///
/// # Example
///
/// ```rust,ignore
/// use localrag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new("docs");
/// store.add(records, 32).await?;
/// let results = store.similarity_search(&query_embedding, 5, None, true).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this store is bound to.
    fn collection_name(&self) -> &str;

    /// Metric fixed at collection creation.
    fn metric(&self) -> DistanceMetric;

    /// Write records as a single unit: either all are stored or none are.
    ///
    /// Records carry final ids. Implementations must reject an id that is
    /// already stored and an embedding whose length differs from the
    /// collection's.
    async fn insert_batch(&self, records: &[StoredRecord]) -> Result<()>;

    /// Store records in sub-batches of `batch_size`.
    ///
    /// Records without an id receive a UUID. Each sub-batch is written
    /// atomically; the first failing sub-batch aborts the call with
    /// [`RagError::StorageWrite`] naming its index, leaving earlier
    /// sub-batches committed. Configuration errors such as
    /// [`RagError::DimensionMismatch`] pass through unwrapped.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyInput`] if `records` is empty.
    async fn add(&self, records: Vec<NewRecord>, batch_size: usize) -> Result<AddResult> {
        if records.is_empty() {
            return Err(RagError::EmptyInput("no records provided to add".into()));
        }
        if batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".into()));
        }

        let records = assign_ids(records);
        check_uniform_dimensions(&records)?;

        let total = records.len();
        for (batch_index, batch) in records.chunks(batch_size).enumerate() {
            self.insert_batch(batch).await.map_err(|e| match e.kind() {
                ErrorKind::Configuration => e,
                _ => RagError::StorageWrite { batch_index, message: e.to_string() },
            })?;
            debug!(collection = self.collection_name(), batch_index, size = batch.len(), "stored batch");
        }

        let total_documents_after = self.count().await?;
        info!(
            collection = self.collection_name(),
            documents_added = total,
            total_documents_after,
            "added records"
        );
        Ok(AddResult { documents_added: total, total_documents_after })
    }

    /// Return up to `top_k` records in ascending distance order.
    ///
    /// An empty collection yields an empty list. With `include_distances`
    /// set on a cosine collection each result also carries `similarity`
    /// and `confidence_score`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for an empty query vector or a zero
    /// `top_k`, and [`RagError::DimensionMismatch`] if the query length
    /// differs from the collection's.
    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        include_distances: bool,
    ) -> Result<Vec<SearchResult>>;

    /// Fetch one record. A missing id is `Ok(None)`.
    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>>;

    /// Remove records by id, ignoring ids that are not stored.
    async fn delete(&self, ids: &[&str]) -> Result<DeleteResult>;

    /// Exact number of stored records.
    async fn count(&self) -> Result<usize>;

    async fn collection_info(&self) -> Result<CollectionInfo>;

    /// Snapshot of this instance's running statistics.
    fn stats(&self) -> VectorStoreStats;
}

fn assign_ids(records: Vec<NewRecord>) -> Vec<StoredRecord> {
    records
        .into_iter()
        .map(|record| StoredRecord {
            id: record.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            content: record.content,
            embedding: record.embedding,
            metadata: record.metadata,
        })
        .collect()
}

fn check_uniform_dimensions(records: &[StoredRecord]) -> Result<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let expected = first.embedding.len();
    if expected == 0 {
        return Err(RagError::InvalidInput(format!("record '{}' has an empty embedding", first.id)));
    }
    match records.iter().find(|r| r.embedding.len() != expected) {
        Some(bad) => Err(RagError::DimensionMismatch { expected, actual: bad.embedding.len() }),
        None => Ok(()),
    }
}

/// Validate search arguments shared by every backend.
pub(crate) fn check_query(query: &[f32], top_k: usize, dimensions: Option<usize>) -> Result<()> {
    if query.is_empty() {
        return Err(RagError::InvalidInput("query vector is empty".into()));
    }
    if top_k == 0 {
        return Err(RagError::InvalidInput("top_k must be greater than zero".into()));
    }
    match dimensions {
        Some(expected) if expected != query.len() => {
            Err(RagError::DimensionMismatch { expected, actual: query.len() })
        }
        _ => Ok(()),
    }
}

/// Brute-force nearest-neighbour ranking over records in insertion order.
///
/// The sort is stable, so records at equal distance keep insertion order.
pub(crate) fn rank_records<'a, I>(
    records: I,
    query: &[f32],
    metric: DistanceMetric,
    top_k: usize,
    filter: Option<&MetadataFilter>,
    include_distances: bool,
) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a StoredRecord>,
{
    let mut scored: Vec<(f32, &StoredRecord)> = records
        .into_iter()
        .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
        .map(|r| (metric.distance(&r.embedding, query), r))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.truncate(top_k);

    scored
        .into_iter()
        .map(|(distance, record)| {
            let similarity =
                (include_distances && metric == DistanceMetric::Cosine).then(|| 1.0 - distance);
            SearchResult {
                id: record.id.clone(),
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                distance,
                similarity,
                confidence_score: similarity.map(|s| s.max(0.0)),
            }
        })
        .collect()
}
