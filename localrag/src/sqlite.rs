//! SQLite vector store backend.
//!
//! Provides [`SqliteVectorStore`], a persistent [`VectorStore`] built on
//! [sqlx](https://docs.rs/sqlx). Records live in a single `vectors.db` file
//! under the caller's storage directory; search is a brute-force scan with
//! the collection's distance metric.
//!
//! # Example
//!
//! ```rust,ignore
//! use localrag::sqlite::SqliteVectorStore;
//!
//! let store = SqliteVectorStore::open("./vector_db", "documents", DistanceMetric::Cosine).await?;
//! store.add(records, 32).await?;
//! let results = store.similarity_search(&query_embedding, 5, None, true).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::document::{Metadata, SearchResult, StoredRecord};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, DeleteResult, DistanceMetric, MetadataFilter, VectorStore, VectorStoreStats,
    check_query, rank_records,
};

/// File name of the database inside the storage directory.
pub const DATABASE_FILE: &str = "vectors.db";

const BACKEND: &str = "sqlite";

/// Outcome of [`SqliteVectorStore::backup`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    /// Directory holding the copied database.
    pub backup_path: PathBuf,
    /// Records of this collection at the time of the copy.
    pub document_count: usize,
    pub backup_time: DateTime<Utc>,
    /// Size of the copied database file in bytes.
    pub backup_size: u64,
}

/// A [`VectorStore`] persisted in SQLite.
///
/// Two tables back every collection in the file:
/// `collections` (name, metric, dimensions, timestamps) and
/// `records` (collection, id, content, little-endian `f32` embedding blob,
/// JSON metadata). Insertion order is the table's `rowid` order.
///
/// Searches only read the database. The query counter reported by
/// [`VectorStore::collection_info`] belongs to this handle and starts at
/// zero on every open.
#[derive(Debug)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    storage_path: PathBuf,
    name: String,
    metric: DistanceMetric,
    created_at: DateTime<Utc>,
    dimensions: RwLock<Option<usize>>,
    stats: StdRwLock<VectorStoreStats>,
}

impl SqliteVectorStore {
    /// Open the named collection under `storage_path`, creating the
    /// directory, database, and collection as needed.
    ///
    /// An existing collection keeps its records and its recorded metric.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::MetricMismatch`] if the collection exists with a
    /// different metric, and [`RagError::VectorStoreError`] on I/O or
    /// database failures.
    pub async fn open(
        storage_path: impl AsRef<Path>,
        collection: &str,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        if collection.trim().is_empty() {
            return Err(RagError::ConfigError("collection name must not be empty".into()));
        }
        tokio::fs::create_dir_all(&storage_path).await.map_err(|e| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("failed to create '{}': {e}", storage_path.display()),
        })?;

        let options = SqliteConnectOptions::new()
            .filename(storage_path.join(DATABASE_FILE))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(Self::map_err)?;
        Self::init_schema(&pool).await?;

        let existing = sqlx::query(
            "SELECT distance_metric, dimensions, created_at FROM collections WHERE name = ?1",
        )
        .bind(collection)
        .fetch_optional(&pool)
        .await
        .map_err(Self::map_err)?;

        let (created_at, dimensions) = match existing {
            Some(row) => {
                let stored: String = row.try_get("distance_metric").map_err(Self::map_err)?;
                let stored_metric: DistanceMetric = stored.parse()?;
                if stored_metric != metric {
                    return Err(RagError::MetricMismatch {
                        collection: collection.to_string(),
                        stored,
                        requested: metric.to_string(),
                    });
                }
                let dimensions: Option<i64> = row.try_get("dimensions").map_err(Self::map_err)?;
                let created_at: String = row.try_get("created_at").map_err(Self::map_err)?;
                info!(collection, metric = %metric, "opened existing collection");
                (parse_timestamp(&created_at)?, dimensions.map(|d| d as usize))
            }
            None => {
                let created_at = Utc::now();
                sqlx::query(
                    "INSERT INTO collections (name, distance_metric, created_at) VALUES (?1, ?2, ?3)",
                )
                .bind(collection)
                .bind(metric.as_str())
                .bind(created_at.to_rfc3339())
                .execute(&pool)
                .await
                .map_err(Self::map_err)?;
                info!(collection, metric = %metric, "created collection");
                (created_at, None)
            }
        };

        Ok(Self {
            pool,
            storage_path,
            name: collection.to_string(),
            metric,
            created_at,
            dimensions: RwLock::new(dimensions),
            stats: StdRwLock::new(VectorStoreStats::default()),
        })
    }

    /// Directory holding the database file.
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Write a consistent copy of the database into the directory `dest`.
    ///
    /// Uses `VACUUM INTO`, so pending WAL frames are included and the copy
    /// can be opened with [`SqliteVectorStore::open`]. Every collection in
    /// the file is copied.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::VectorStoreError`] if `dest` already holds a
    /// database or the copy fails.
    pub async fn backup(&self, dest: impl AsRef<Path>) -> Result<BackupInfo> {
        let backup_path = dest.as_ref().to_path_buf();
        let io_err = |e: std::io::Error| RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("backup to '{}' failed: {e}", backup_path.display()),
        };
        tokio::fs::create_dir_all(&backup_path).await.map_err(io_err)?;

        let target = backup_path.join(DATABASE_FILE);
        if tokio::fs::try_exists(&target).await.map_err(io_err)? {
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("'{}' already exists", target.display()),
            });
        }

        sqlx::query("VACUUM INTO ?1")
            .bind(target.to_string_lossy().into_owned())
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;

        let backup_size = tokio::fs::metadata(&target).await.map_err(io_err)?.len();
        let document_count = self.count().await?;
        info!(
            collection = %self.name,
            path = %backup_path.display(),
            document_count,
            backup_size,
            "backed up collection"
        );
        Ok(BackupInfo { backup_path, document_count, backup_time: Utc::now(), backup_size })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                distance_metric TEXT NOT NULL,
                dimensions INTEGER,
                created_at TEXT NOT NULL,
                last_updated TEXT
            )",
        )
        .execute(pool)
        .await
        .map_err(Self::map_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL REFERENCES collections(name),
                id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(pool)
        .await
        .map_err(Self::map_err)?;

        Ok(())
    }

    fn map_err(e: sqlx::Error) -> RagError {
        RagError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_record(row: &SqliteRow) -> Result<StoredRecord> {
        let metadata: String = row.try_get("metadata").map_err(Self::map_err)?;
        let metadata: Metadata = serde_json::from_str(&metadata).map_err(|e| {
            RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("corrupt metadata: {e}"),
            }
        })?;
        let embedding: Vec<u8> = row.try_get("embedding").map_err(Self::map_err)?;
        Ok(StoredRecord {
            id: row.try_get("id").map_err(Self::map_err)?,
            content: row.try_get("content").map_err(Self::map_err)?,
            embedding: Self::deserialize_embedding(&embedding),
            metadata,
        })
    }

    fn update_stats(&self, update: impl FnOnce(&VectorStoreStats) -> VectorStoreStats) {
        let mut guard = match self.stats.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = update(&guard);
    }

    fn footprint_bytes(&self) -> u64 {
        WalkDir::new(&self.storage_path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc)).map_err(|e| {
        RagError::VectorStoreError {
            backend: BACKEND.to_string(),
            message: format!("invalid timestamp '{value}': {e}"),
        }
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn insert_batch(&self, records: &[StoredRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        let mut dimensions = self.dimensions.write().await;
        let expected = dimensions.unwrap_or(first.embedding.len());
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != expected) {
            return Err(RagError::DimensionMismatch { expected, actual: bad.embedding.len() });
        }

        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata).map_err(|e| {
                RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!("failed to serialize metadata for '{}': {e}", record.id),
                }
            })?;
            sqlx::query(
                "INSERT INTO records (collection, id, content, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&self.name)
            .bind(&record.id)
            .bind(&record.content)
            .bind(Self::serialize_embedding(&record.embedding))
            .bind(&metadata)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        }
        sqlx::query(
            "UPDATE collections SET dimensions = ?1, last_updated = ?2 WHERE name = ?3",
        )
        .bind(expected as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(&self.name)
        .execute(&mut *tx)
        .await
        .map_err(Self::map_err)?;
        tx.commit().await.map_err(Self::map_err)?;

        *dimensions = Some(expected);
        drop(dimensions);

        self.update_stats(|s| s.record_batch(records.len()));
        debug!(collection = %self.name, count = records.len(), "committed sqlite batch");
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        include_distances: bool,
    ) -> Result<Vec<SearchResult>> {
        check_query(query, top_k, *self.dimensions.read().await)?;

        let rows = sqlx::query(
            "SELECT id, content, embedding, metadata FROM records
             WHERE collection = ?1 ORDER BY rowid",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;
        let records = rows.iter().map(Self::row_to_record).collect::<Result<Vec<_>>>()?;

        self.update_stats(VectorStoreStats::record_query);

        let results = rank_records(&records, query, self.metric, top_k, filter, include_distances);
        debug!(collection = %self.name, scanned = records.len(), returned = results.len(), "sqlite search");
        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            "SELECT id, content, embedding, metadata FROM records WHERE collection = ?1 AND id = ?2",
        )
        .bind(&self.name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, ids: &[&str]) -> Result<DeleteResult> {
        let initial = self.count().await?;

        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for id in ids {
            sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
                .bind(&self.name)
                .bind(*id)
                .execute(&mut *tx)
                .await
                .map_err(Self::map_err)?;
        }
        sqlx::query("UPDATE collections SET last_updated = ?1 WHERE name = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        tx.commit().await.map_err(Self::map_err)?;

        let remaining = self.count().await?;
        let documents_deleted = initial.saturating_sub(remaining);
        self.update_stats(|s| s.record_delete(documents_deleted));
        info!(collection = %self.name, documents_deleted, remaining, "deleted records");
        Ok(DeleteResult { documents_deleted, remaining })
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?1")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(count as usize)
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let last_updated: Option<String> =
            sqlx::query_scalar("SELECT last_updated FROM collections WHERE name = ?1")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await
                .map_err(Self::map_err)?;

        Ok(CollectionInfo {
            name: self.name.clone(),
            document_count: self.count().await?,
            storage_path: Some(self.storage_path.display().to_string()),
            distance_metric: self.metric,
            dimensions: *self.dimensions.read().await,
            footprint_bytes: self.footprint_bytes(),
            created_at: self.created_at,
            last_updated: last_updated.as_deref().map(parse_timestamp).transpose()?,
            total_queries: self.stats().queries_executed,
        })
    }

    fn stats(&self) -> VectorStoreStats {
        match self.stats.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
