//! Tests for recursive character chunking.

use localrag::{Chunk, Chunker, Document, MetadataValue, RagError, RecursiveChunker};
use proptest::prelude::*;

fn chunk_metadata_usize(chunk: &Chunk, key: &str) -> Option<usize> {
    chunk.metadata.get(key).and_then(MetadataValue::as_i64).and_then(|v| usize::try_from(v).ok())
}

fn paragraph_document() -> Document {
    let paragraph = format!("{}.\n\n", "a".repeat(97));
    Document::new(paragraph.repeat(25))
        .with_metadata("source", "data/long.txt")
        .with_metadata("file_type", ".txt")
}

#[test]
fn long_paragraph_document_yields_three_bounded_chunks() {
    let chunker = RecursiveChunker::new(1000, 200).unwrap();
    let chunks = chunker.chunk_documents(&[paragraph_document()]).unwrap();

    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_id, i);
        assert!(chunk.content.chars().count() <= 1000);
        assert_eq!(chunk_metadata_usize(chunk, "chunk_id"), Some(i));
        assert_eq!(
            chunk_metadata_usize(chunk, "chunk_size"),
            Some(chunk.content.chars().count())
        );
        assert_eq!(chunk.metadata["source"].as_str(), Some("data/long.txt"));
        assert_eq!(chunk.metadata["chunking_method"].as_str(), Some("recursive_character"));
    }
}

#[test]
fn consecutive_chunks_share_overlap() {
    let text: String = (0..60).map(|i| format!("word{i:02} ")).collect();
    let chunker = RecursiveChunker::new(100, 20).unwrap();
    let chunks = chunker.chunk_text(&text, Default::default()).unwrap();

    assert!(chunks.len() > 1);
    for pair in chunks.windows(2) {
        let carried: Vec<&str> = pair[1].content.split(' ').take(2).collect();
        assert!(
            pair[0].content.ends_with(&carried.join(" ")),
            "'{}' does not continue from '{}'",
            pair[1].content,
            pair[0].content
        );
    }
}

#[test]
fn chunk_ids_continue_across_documents() {
    let chunker = RecursiveChunker::new(50, 10).unwrap();
    let documents = vec![
        Document::new("first document text. ".repeat(10)).with_metadata("source", "one.txt"),
        Document::new("   \n  "),
        Document::new("second document text. ".repeat(10)).with_metadata("source", "two.txt"),
    ];
    let chunks = chunker.chunk_documents(&documents).unwrap();

    let ids: Vec<usize> = chunks.iter().map(|c| c.chunk_id).collect();
    assert_eq!(ids, (0..chunks.len()).collect::<Vec<_>>());
    assert!(chunks.iter().any(|c| c.metadata["source"].as_str() == Some("one.txt")));
    assert!(chunks.iter().any(|c| c.metadata["source"].as_str() == Some("two.txt")));
    assert_eq!(chunker.stats().documents_processed, 2);
    assert_eq!(chunker.stats().chunks_created, chunks.len());
}

#[test]
fn empty_inputs_are_rejected() {
    let chunker = RecursiveChunker::new(100, 10).unwrap();
    assert!(matches!(chunker.chunk_documents(&[]), Err(RagError::EmptyInput(_))));
    assert!(matches!(
        chunker.chunk_documents(&[Document::new(""), Document::new("  \n\t")]),
        Err(RagError::EmptyInput(_))
    ));
    assert!(matches!(chunker.chunk_text("   ", Default::default()), Err(RagError::EmptyInput(_))));
}

#[test]
fn invalid_sizes_are_config_errors() {
    assert!(matches!(RecursiveChunker::new(0, 0), Err(RagError::ConfigError(_))));
    assert!(matches!(RecursiveChunker::new(100, 100), Err(RagError::ConfigError(_))));
    assert!(matches!(RecursiveChunker::new(100, 150), Err(RagError::ConfigError(_))));
}

#[test]
fn raw_text_chunks_are_tagged() {
    let chunker = RecursiveChunker::new(100, 0).unwrap();
    let chunks = chunker.chunk_text("Short note.", Default::default()).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Short note.");
    assert_eq!(chunks[0].metadata["source_type"].as_str(), Some("raw_text"));
}

#[test]
fn unbroken_text_falls_back_to_characters() {
    let chunker = RecursiveChunker::new(10, 0).unwrap();
    let chunks = chunker.chunk_text(&"é".repeat(35), Default::default()).unwrap();
    let sizes: Vec<usize> = chunks.iter().map(|c| c.content.chars().count()).collect();
    assert_eq!(sizes, vec![10, 10, 10, 5]);
}

#[test]
fn validation_flags_missing_metadata_and_tiny_chunks() {
    let chunker = RecursiveChunker::new(200, 20).unwrap();
    let mut chunks = chunker.chunk_text("tiny", Default::default()).unwrap();

    let report = chunker.validate(&chunks);
    assert!(report.is_valid);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("very small"));

    chunks[0].metadata.remove("chunk_size");
    let report = chunker.validate(&chunks);
    assert!(!report.is_valid);
    assert!(report.issues[0].contains("missing required metadata"));

    assert!(!chunker.validate(&[]).is_valid);
}

#[test]
fn summary_counts_file_types_and_sources() {
    let chunker = RecursiveChunker::new(1000, 200).unwrap();
    let chunks = chunker.chunk_documents(&[paragraph_document()]).unwrap();
    let summary = chunker.summary(&chunks);

    assert_eq!(summary.total_chunks, 3);
    assert_eq!(summary.distinct_sources, 1);
    assert_eq!(summary.file_types.get(".txt"), Some(&3));
    assert_eq!(summary.chunk_size, 1000);
    assert!(summary.min_chunk_size <= summary.average_chunk_size);
    assert!(summary.average_chunk_size <= summary.max_chunk_size);
}

/// Every chunk respects the size bound and carries visible text.
mod prop_chunk_bounds {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn chunks_are_non_empty_and_bounded(
            text in "[a-z][a-zA-Z .,!?\n]{0,3000}",
            chunk_size in 20usize..500,
            overlap_ratio in 0.0f64..0.9,
        ) {
            let overlap = (chunk_size as f64 * overlap_ratio) as usize;
            let chunker = RecursiveChunker::new(chunk_size, overlap).unwrap();
            let chunks = chunker.chunk_text(&text, Default::default()).unwrap();

            prop_assert!(!chunks.is_empty());
            for chunk in &chunks {
                prop_assert!(!chunk.content.trim().is_empty());
                prop_assert!(chunk.content.chars().count() <= chunk_size);
            }
        }

        #[test]
        fn every_word_survives_chunking(
            words in proptest::collection::vec("[a-z]{1,12}", 1..200),
            chunk_size in 30usize..300,
        ) {
            let text = words.join(" ");
            let chunker = RecursiveChunker::new(chunk_size, chunk_size / 5).unwrap();
            let chunks = chunker.chunk_text(&text, Default::default()).unwrap();
            let joined: String = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join(" ");

            for word in &words {
                prop_assert!(joined.contains(word.as_str()));
            }
        }
    }
}
