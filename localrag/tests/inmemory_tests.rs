//! Tests for the in-memory vector store.

use localrag::{
    DistanceMetric, InMemoryVectorStore, Metadata, MetadataFilter, NewRecord, RagError, VectorStore,
};
use proptest::prelude::*;

fn record(id: Option<&str>, content: &str, embedding: Vec<f32>) -> NewRecord {
    NewRecord {
        id: id.map(str::to_string),
        content: content.to_string(),
        embedding,
        metadata: Metadata::new(),
    }
}

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero embedding", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-6 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

#[tokio::test]
async fn nearest_record_ranks_first_with_derived_scores() {
    let store = InMemoryVectorStore::new("docs");
    store
        .add(
            vec![
                record(Some("a"), "north", vec![1.0, 0.0]),
                record(Some("b"), "east", vec![0.0, 1.0]),
                record(Some("c"), "northeast", vec![0.707, 0.707]),
            ],
            32,
        )
        .await
        .unwrap();

    let results = store.similarity_search(&[0.9, 0.1], 2, None, true).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "a");
    assert_eq!(results[1].id, "c");
    assert!(results[0].distance <= results[1].distance);

    let similarity = results[0].similarity.unwrap();
    assert!((similarity - (1.0 - results[0].distance)).abs() < 1e-6);
    assert_eq!(results[0].confidence_score, Some(similarity.max(0.0)));

    let bare = store.similarity_search(&[0.9, 0.1], 2, None, false).await.unwrap();
    assert!(bare.iter().all(|r| r.similarity.is_none() && r.confidence_score.is_none()));
}

#[tokio::test]
async fn top_k_larger_than_collection_returns_everything() {
    let store = InMemoryVectorStore::new("docs");
    let records = (0..5).map(|i| record(None, &format!("chunk {i}"), vec![1.0, i as f32])).collect();
    let added = store.add(records, 2).await.unwrap();
    assert_eq!(added.documents_added, 5);
    assert_eq!(added.total_documents_after, 5);
    assert_eq!(store.collection_info().await.unwrap().document_count, 5);

    let results = store.similarity_search(&[1.0, 2.0], 10, None, true).await.unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].content, "chunk 2");
}

#[tokio::test]
async fn empty_collection_returns_no_results() {
    let store = InMemoryVectorStore::new("empty");
    let results = store.similarity_search(&[1.0, 0.0, 0.0], 5, None, true).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn second_batch_failure_keeps_first_batch() {
    let store = InMemoryVectorStore::new("docs");
    let records = vec![
        record(Some("a"), "one", vec![1.0, 0.0]),
        record(Some("b"), "two", vec![0.0, 1.0]),
        record(Some("c"), "three", vec![1.0, 1.0]),
        record(Some("a"), "duplicate", vec![1.0, 0.5]),
    ];
    let err = store.add(records, 2).await.unwrap_err();

    assert!(matches!(err, RagError::StorageWrite { batch_index: 1, .. }));
    assert_eq!(store.count().await.unwrap(), 2);
    assert!(store.get_by_id("c").await.unwrap().is_none());
}

#[tokio::test]
async fn ids_are_unique_until_deleted() {
    let store = InMemoryVectorStore::new("docs");
    let err = store
        .add(vec![record(Some("a"), "one", vec![1.0, 0.0]), record(Some("a"), "again", vec![0.0, 1.0])], 8)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::StorageWrite { batch_index: 0, .. }));
    assert_eq!(store.count().await.unwrap(), 0);

    store.add(vec![record(Some("a"), "one", vec![1.0, 0.0])], 8).await.unwrap();
    assert!(store.add(vec![record(Some("a"), "clash", vec![1.0, 0.0])], 8).await.is_err());

    store.delete(&["a"]).await.unwrap();
    store.add(vec![record(Some("a"), "replacement", vec![0.0, 1.0])], 8).await.unwrap();
    assert_eq!(store.get_by_id("a").await.unwrap().unwrap().content, "replacement");
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn dimensions_are_fixed_by_the_first_insert() {
    let store = InMemoryVectorStore::new("docs");
    store.add(vec![record(None, "two dims", vec![1.0, 0.0])], 8).await.unwrap();

    let err = store.add(vec![record(None, "three dims", vec![1.0, 0.0, 0.0])], 8).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));

    let err = store.similarity_search(&[1.0, 0.0, 0.0], 1, None, false).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));

    let err = store
        .add(vec![record(None, "x", vec![1.0, 0.0]), record(None, "y", vec![1.0])], 8)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn invalid_arguments_are_rejected() {
    let store = InMemoryVectorStore::new("docs");
    assert!(matches!(store.add(Vec::new(), 8).await, Err(RagError::EmptyInput(_))));
    assert!(matches!(
        store.add(vec![record(None, "x", vec![1.0])], 0).await,
        Err(RagError::ConfigError(_))
    ));
    assert!(matches!(
        store.similarity_search(&[], 3, None, false).await,
        Err(RagError::InvalidInput(_))
    ));
    assert!(matches!(
        store.similarity_search(&[1.0], 0, None, false).await,
        Err(RagError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn generated_ids_round_trip_through_get_by_id() {
    let store = InMemoryVectorStore::new("docs");
    let mut metadata = Metadata::new();
    metadata.insert("source".into(), "notes.md".into());
    metadata.insert("page".into(), 3i64.into());
    store
        .add(
            vec![NewRecord {
                id: None,
                content: "stored text".into(),
                embedding: vec![0.6, 0.8],
                metadata: metadata.clone(),
            }],
            8,
        )
        .await
        .unwrap();

    let found = store.similarity_search(&[0.6, 0.8], 1, None, false).await.unwrap();
    let stored = store.get_by_id(&found[0].id).await.unwrap().unwrap();
    assert_eq!(stored.content, "stored text");
    assert_eq!(stored.embedding, vec![0.6, 0.8]);
    assert_eq!(stored.metadata, metadata);
    assert!(uuid::Uuid::parse_str(&stored.id).is_ok());
    assert!(store.get_by_id("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_reports_removed_and_remaining() {
    let store = InMemoryVectorStore::new("docs");
    store
        .add(
            vec![
                record(Some("a"), "one", vec![1.0, 0.0]),
                record(Some("b"), "two", vec![0.0, 1.0]),
                record(Some("c"), "three", vec![1.0, 1.0]),
            ],
            8,
        )
        .await
        .unwrap();

    let result = store.delete(&["a", "c", "zzz"]).await.unwrap();
    assert_eq!(result.documents_deleted, 2);
    assert_eq!(result.remaining, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(store.stats().records_deleted, 2);
}

#[tokio::test]
async fn metadata_filter_restricts_candidates() {
    let store = InMemoryVectorStore::new("docs");
    let mut markdown = Metadata::new();
    markdown.insert("file_type".into(), ".md".into());
    let mut txt = Metadata::new();
    txt.insert("file_type".into(), ".txt".into());
    store
        .add(
            vec![
                NewRecord { id: Some("near".into()), content: "near".into(), embedding: vec![1.0, 0.0], metadata: txt },
                NewRecord { id: Some("far".into()), content: "far".into(), embedding: vec![0.0, 1.0], metadata: markdown },
            ],
            8,
        )
        .await
        .unwrap();

    let filter = MetadataFilter::new().eq("file_type", ".md");
    let results = store.similarity_search(&[1.0, 0.0], 5, Some(&filter), false).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "far");
}

#[tokio::test]
async fn non_cosine_metrics_omit_similarity() {
    let store = InMemoryVectorStore::with_metric("l2", DistanceMetric::L2);
    store.add(vec![record(Some("a"), "a", vec![1.0, 2.0])], 8).await.unwrap();
    let results = store.similarity_search(&[1.0, 0.0], 1, None, true).await.unwrap();
    assert!((results[0].distance - 4.0).abs() < 1e-6);
    assert!(results[0].similarity.is_none());

    let info = store.collection_info().await.unwrap();
    assert_eq!(info.distance_metric, DistanceMetric::L2);
    assert_eq!(info.dimensions, Some(2));
    assert_eq!(info.total_queries, 1);
    assert!(info.storage_path.is_none());
}

/// Search returns at most `top_k` results in ascending distance order, and
/// count tracks adds and deletes exactly.
mod prop_inmemory_invariants {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_ascending_and_bounded_by_top_k(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..30),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..40,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let store = InMemoryVectorStore::new("prop");
                let records = embeddings
                    .iter()
                    .enumerate()
                    .map(|(i, e)| record(None, &format!("record {i}"), e.clone()))
                    .collect();
                store.add(records, 7).await.unwrap();
                store.similarity_search(&query, top_k, None, true).await.unwrap()
            });

            prop_assert_eq!(results.len(), top_k.min(embeddings.len()));
            for pair in results.windows(2) {
                prop_assert!(pair[0].distance <= pair[1].distance);
            }
            for result in &results {
                let similarity = result.similarity.unwrap();
                prop_assert!((similarity - (1.0 - result.distance)).abs() < 1e-6);
                prop_assert!(result.confidence_score.unwrap() >= 0.0);
            }
        }

        #[test]
        fn count_tracks_adds_and_deletes(
            sizes in proptest::collection::vec(1usize..10, 1..6),
            delete_every in 2usize..5,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (expected, counted) = rt.block_on(async {
                let store = InMemoryVectorStore::new("prop");
                let mut ids = Vec::new();
                for (batch, size) in sizes.iter().enumerate() {
                    let records: Vec<NewRecord> = (0..*size)
                        .map(|i| {
                            let id = format!("{batch}-{i}");
                            ids.push(id.clone());
                            record(Some(&id), "text", vec![1.0, i as f32])
                        })
                        .collect();
                    store.add(records, 3).await.unwrap();
                }
                let doomed: Vec<&str> =
                    ids.iter().step_by(delete_every).map(String::as_str).collect();
                let deleted = store.delete(&doomed).await.unwrap();
                prop_assert_eq!(deleted.documents_deleted, doomed.len());
                prop_assert_eq!(deleted.remaining, ids.len() - doomed.len());
                Ok((ids.len() - doomed.len(), store.count().await.unwrap()))
            })?;

            prop_assert_eq!(expected, counted);
        }
    }
}
