//! End-to-end tests for the ingestion and query pipelines using the hashing
//! embedder, the in-memory store, and scripted generators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use localrag::generation::EMPTY_RESPONSE_FALLBACK;
use localrag::{
    AnswerGenerator, DirectoryLoader, Document, EmbeddingProvider, ErrorKind, GenerationRequest,
    HashingEmbeddingProvider, InMemoryVectorStore, IngestStage, IngestionPipeline, MetadataFilter,
    QueryPipeline, QueryStage, RagConfig, RagError, VectorStore,
};

/// Returns a fixed reply and remembers every request.
struct ScriptedGenerator {
    reply: Result<String, String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(reply.to_string()), delay: None, requests: Mutex::new(Vec::new()) })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self { reply: Err(message.to_string()), delay: None, requests: Mutex::new(Vec::new()) })
    }

    fn stalling(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok("too late".to_string()),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> localrag::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(|message| RagError::GenerationError {
            service: "scripted".to_string(),
            message,
        })
    }

    fn service_name(&self) -> &str {
        "scripted"
    }
}

/// Produces NaN vectors, which must never reach the store.
struct BrokenProvider;

#[async_trait]
impl EmbeddingProvider for BrokenProvider {
    async fn embed(&self, _text: &str) -> localrag::Result<Vec<f32>> {
        Ok(vec![f32::NAN; 8])
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

fn config() -> RagConfig {
    RagConfig::builder()
        .chunk_size(200)
        .chunk_overlap(40)
        .batch_size(4)
        .top_k(3)
        .max_context_length(600)
        .build()
        .unwrap()
}

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbeddingProvider::new(128))
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "Q1 2025 budget projections total $2.5M. Marketing receives $600K and \
             engineering receives $1.2M. The remaining budget covers operations.",
        )
        .with_metadata("source", "budget.txt")
        .with_metadata("file_type", ".txt"),
        Document::new(
            "The office relocation is planned for June. Movers are booked and the new \
             lease starts on the first of the month.",
        )
        .with_metadata("source", "office.md")
        .with_metadata("file_type", ".md"),
        Document::new(
            "Customer churn fell to 3% in March after the onboarding redesign shipped. \
             Support tickets dropped by a third.",
        )
        .with_metadata("source", "churn.txt")
        .with_metadata("file_type", ".txt"),
    ]
}

async fn ingested_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store.clone())
        .build()
        .unwrap();
    let report = pipeline.run(&corpus()).await;
    assert!(report.success, "ingestion failed: {:?}", report.failure);
    store
}

fn query_pipeline(store: Arc<InMemoryVectorStore>, generator: Arc<ScriptedGenerator>) -> QueryPipeline {
    QueryPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store)
        .generator(generator)
        .model("test-model")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn ingestion_reports_every_stage() {
    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store.clone())
        .build()
        .unwrap();
    let report = pipeline.run(&corpus()).await;

    assert!(report.success);
    assert!(report.failure.is_none());
    let stats = &report.stats;
    let stages: Vec<IngestStage> = stats.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![IngestStage::Load, IngestStage::Chunk, IngestStage::Embed, IngestStage::Store]);
    assert!(stats.stages.iter().all(|s| s.success));
    assert_eq!(stats.documents_loaded, 3);
    assert!(stats.chunks_created >= 3);
    assert_eq!(stats.embeddings_generated, stats.chunks_created);
    assert_eq!(stats.documents_stored, stats.chunks_created);
    assert!(stats.finished_at.is_some());
    assert_eq!(stats.document_summary.as_ref().unwrap().total_documents, 3);
    assert_eq!(stats.embedding_summary.as_ref().unwrap().dimensions, 128);

    let collection = report.collection.unwrap();
    assert_eq!(collection.document_count, stats.documents_stored);
    assert_eq!(store.count().await.unwrap(), stats.documents_stored);
}

#[tokio::test]
async fn empty_loader_fails_in_load_stage() {
    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store.clone())
        .build()
        .unwrap();
    let report = pipeline.run(&Vec::<Document>::new()).await;

    assert!(!report.success);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, IngestStage::Load);
    assert_eq!(failure.kind, ErrorKind::Input);
    assert_eq!(report.stats.stages.len(), 1);
    assert!(!report.stats.stages[0].success);
}

#[tokio::test]
async fn missing_directory_fails_in_load_stage() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store)
        .build()
        .unwrap();
    let report = pipeline.run(&DirectoryLoader::new(dir.path().join("absent"))).await;

    assert_eq!(report.failure.unwrap().stage, IngestStage::Load);
}

#[tokio::test]
async fn invalid_embeddings_are_never_stored() {
    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(Arc::new(BrokenProvider))
        .vector_store(store.clone())
        .build()
        .unwrap();
    let report = pipeline.run(&corpus()).await;

    assert!(!report.success);
    assert_eq!(report.failure.unwrap().stage, IngestStage::Embed);
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(report.stats.stages.iter().all(|s| s.stage != IngestStage::Store));
}

#[tokio::test]
async fn directory_ingestion_carries_file_metadata() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("plan.md"), "# Plan\n\nShip the redesign in April.").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "Remember to renew the lease.").unwrap();
    std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

    let store = Arc::new(InMemoryVectorStore::new("docs"));
    let pipeline = IngestionPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store.clone())
        .build()
        .unwrap();
    let report = pipeline.run(&DirectoryLoader::new(dir.path())).await;
    assert!(report.success);
    assert_eq!(report.stats.documents_loaded, 2);

    let markdown = MetadataFilter::new().eq("file_type", ".md");
    let query = HashingEmbeddingProvider::new(128).embed("redesign").await.unwrap();
    let results = store.similarity_search(&query, 5, Some(&markdown), true).await.unwrap();
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.metadata["original_filename"].as_str(), Some("plan.md"));
        assert!(result.metadata.contains_key("embedding_model"));
    }
}

#[tokio::test]
async fn answers_cite_retrieved_sources() {
    let store = ingested_store().await;
    let generator = ScriptedGenerator::replying("  The Q1 budget is $2.5M [Source 1].  ");
    let pipeline = query_pipeline(store, generator.clone());

    let result = pipeline.ask("What are the Q1 2025 budget projections?").await;
    let answer = result.answer().expect("query should succeed");

    assert!(answer.success);
    assert_eq!(answer.response, "The Q1 budget is $2.5M [Source 1].");
    assert!(!answer.sources.is_empty());
    assert!(answer.sources.len() <= 3);
    assert_eq!(answer.sources[0].source_id, 1);
    assert_eq!(answer.sources[0].filename, "budget.txt");
    assert_eq!(answer.retrieval_stats.chunks_found, answer.sources.len());
    assert!(answer.retrieval_stats.top_similarity_score.is_some());
    assert!(answer.context_used.starts_with("[Source 1]: "));

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "test-model");
    assert!(requests[0].prompt.contains("QUESTION: What are the Q1 2025 budget projections?"));
    assert!(requests[0].prompt.contains("[Source 1]: "));
    assert_eq!(requests[0].options.max_tokens, 500);
}

#[tokio::test]
async fn filters_limit_retrieval_to_matching_chunks() {
    let store = ingested_store().await;
    let pipeline = query_pipeline(store, ScriptedGenerator::replying("June."));
    let filter = MetadataFilter::new().eq("source", "office.md");

    let result = pipeline.ask_filtered("What are the Q1 2025 budget projections?", Some(&filter)).await;
    let answer = result.answer().unwrap();
    assert!(answer.sources.iter().all(|s| s.filename == "office.md"));
}

#[tokio::test]
async fn blank_completion_is_replaced_with_apology() {
    let store = ingested_store().await;
    let pipeline = query_pipeline(store, ScriptedGenerator::replying(" \n\t "));

    let result = pipeline.ask("When is the office move?").await;
    assert_eq!(result.answer().unwrap().response, EMPTY_RESPONSE_FALLBACK);
}

#[tokio::test]
async fn empty_collection_still_asks_the_generator() {
    let store = Arc::new(InMemoryVectorStore::new("empty"));
    let generator = ScriptedGenerator::replying("I cannot find that in the provided documents.");
    let pipeline = query_pipeline(store, generator.clone());

    let result = pipeline.ask("What is the churn rate?").await;
    let answer = result.answer().unwrap();

    assert!(answer.sources.is_empty());
    assert_eq!(answer.retrieval_stats.chunks_found, 0);
    assert_eq!(answer.retrieval_stats.top_similarity_score, None);
    assert!(answer.context_used.is_empty());
    assert_eq!(generator.requests().len(), 1);
    assert!(generator.requests()[0].prompt.contains("DOCUMENT DATA:\n\n"));
}

#[tokio::test]
async fn generator_errors_become_failures() {
    let store = ingested_store().await;
    let pipeline = query_pipeline(store, ScriptedGenerator::failing("model not loaded"));

    let result = pipeline.ask("What is the churn rate?").await;
    assert!(!result.is_success());
    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, QueryStage::Generate);
    assert_eq!(failure.kind, ErrorKind::ExternalService);
    assert!(failure.error.contains("model not loaded"));
    assert!(!failure.success);

    let stats = pipeline.stats();
    assert_eq!(stats.queries_processed, 1);
    assert_eq!(stats.failed_queries, 1);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn slow_generation_times_out() {
    let store = ingested_store().await;
    let pipeline = QueryPipeline::builder()
        .config(config())
        .embedding_provider(provider())
        .vector_store(store)
        .generator(ScriptedGenerator::stalling(Duration::from_secs(120)))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    let result = pipeline.ask("What is the churn rate?").await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, QueryStage::Generate);
    assert!(failure.error.contains("timed out"));
}

#[tokio::test]
async fn blank_question_fails_before_retrieval() {
    let store = ingested_store().await;
    let generator = ScriptedGenerator::replying("unused");
    let pipeline = query_pipeline(store, generator.clone());

    let result = pipeline.ask("   ").await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.stage, QueryStage::EmbedQuery);
    assert_eq!(failure.kind, ErrorKind::Input);
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn statistics_accumulate_over_queries() {
    let store = ingested_store().await;
    let pipeline = query_pipeline(store, ScriptedGenerator::replying("ok"));

    for question in ["budget?", "office?", "churn?"] {
        assert!(pipeline.ask(question).await.is_success());
    }
    assert!(!pipeline.ask("").await.is_success());

    let stats = pipeline.stats();
    assert_eq!(stats.queries_processed, 4);
    assert_eq!(stats.successful_queries, 3);
    assert_eq!(stats.failed_queries, 1);
    assert_eq!(stats.success_rate, 75.0);
    assert_eq!(stats.average_total_time, stats.total_query_time / 4);
}
