//! Subcommand handlers. Each returns `Ok(false)` when a pipeline stage
//! failed and the process should exit non-zero.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use localrag::ollama::{OllamaConfig, OllamaEmbeddingProvider, OllamaGenerator};
use localrag::sqlite::SqliteVectorStore;
use localrag::{
    DirectoryLoader, DistanceMetric, EmbeddingProvider, HashingEmbeddingProvider, IngestionPipeline,
    IngestionReport, MetadataFilter, QueryPipeline, QueryResult, RagConfig, VectorStore,
};
use tracing::warn;

use crate::{EmbedderKind, IngestArgs, QueryArgs, StoreArgs};

fn ollama_config(store: &StoreArgs) -> OllamaConfig {
    OllamaConfig {
        base_url: store.ollama_url.clone(),
        embedding_model: store.embedding_model.clone(),
        ..OllamaConfig::default()
    }
}

async fn embedding_provider(store: &StoreArgs) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    Ok(match store.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbeddingProvider::new(store.hashing_dimensions)),
        EmbedderKind::Ollama => Arc::new(
            OllamaEmbeddingProvider::connect(&ollama_config(store))
                .await
                .context("failed to load embedding model")?,
        ),
    })
}

async fn open_store(store: &StoreArgs) -> anyhow::Result<Arc<SqliteVectorStore>> {
    let metric: DistanceMetric = store.metric.parse()?;
    let opened = SqliteVectorStore::open(&store.storage_path, &store.collection_name, metric)
        .await
        .with_context(|| format!("failed to open collection '{}'", store.collection_name))?;
    Ok(Arc::new(opened))
}

pub async fn ingest(store: &StoreArgs, args: IngestArgs) -> anyhow::Result<bool> {
    let config = RagConfig::builder()
        .chunk_size(args.chunk_size)
        .chunk_overlap(args.chunk_overlap)
        .batch_size(args.batch_size)
        .distance_metric(store.metric.parse()?)
        .build()?;

    let pipeline = IngestionPipeline::builder()
        .config(config)
        .embedding_provider(embedding_provider(store).await?)
        .vector_store(open_store(store).await?)
        .build()?;

    let loader = DirectoryLoader::new(&args.data_directory).recursive(args.recursive);
    let report = pipeline.run(&loader).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_ingestion(&report);
    }
    Ok(report.success)
}

fn print_ingestion(report: &IngestionReport) {
    let stats = &report.stats;
    println!("Ingestion {}", if report.success { "completed" } else { "failed" });
    println!("  Total time:        {:.2}s", stats.total_processing_time.as_secs_f64());
    println!("  Documents loaded:  {}", stats.documents_loaded);
    println!("  Chunks created:    {}", stats.chunks_created);
    println!("  Embeddings:        {}", stats.embeddings_generated);
    println!("  Records stored:    {}", stats.documents_stored);
    println!("  Stages:");
    for stage in &stats.stages {
        println!(
            "    {:<6} {:>8.2}s  {:>6} items  {}",
            stage.stage.to_string(),
            stage.duration.as_secs_f64(),
            stage.output_count,
            if stage.success { "ok" } else { "FAILED" }
        );
    }
    if let Some(collection) = &report.collection {
        println!(
            "  Collection '{}' now holds {} records ({} bytes on disk)",
            collection.name, collection.document_count, collection.footprint_bytes
        );
    }
    if let Some(failure) = &report.failure {
        println!("  Error in {} stage: {}", failure.stage, failure.message);
    }
}

fn parse_filters(filters: &[String]) -> anyhow::Result<Option<MetadataFilter>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut filter = MetadataFilter::new();
    for raw in filters {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("filter '{raw}' must look like KEY=VALUE");
        };
        filter = filter.eq(key.trim(), value.trim());
    }
    Ok(Some(filter))
}

pub async fn query(store: &StoreArgs, args: QueryArgs) -> anyhow::Result<bool> {
    let config = RagConfig::builder()
        .top_k(args.top_k)
        .max_context_length(args.max_context_length)
        .distance_metric(store.metric.parse()?)
        .build()?;
    let filter = parse_filters(&args.filters)?;

    let generator = OllamaGenerator::new(&OllamaConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        ..ollama_config(store)
    })?;
    if !generator.is_available(&args.model_name).await {
        warn!(model = %args.model_name, "generation model may be unavailable");
    }

    let vector_store = open_store(store).await?;
    let pipeline = QueryPipeline::builder()
        .config(config)
        .embedding_provider(embedding_provider(store).await?)
        .vector_store(vector_store.clone())
        .generator(Arc::new(generator))
        .model(args.model_name)
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let result = pipeline.ask_filtered(&args.question, filter.as_ref()).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_query(&result);
    }
    if args.show_stats {
        println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
        println!("{}", serde_json::to_string_pretty(&vector_store.stats())?);
    }
    Ok(result.is_success())
}

fn print_query(result: &QueryResult) {
    match result {
        QueryResult::Answer(answer) => {
            println!("Question: {}\n", answer.query);
            println!("{}\n", answer.response);
            if !answer.sources.is_empty() {
                println!("Sources:");
                for source in &answer.sources {
                    println!(
                        "  [Source {}] {} ({}) confidence {:.3}",
                        source.source_id, source.filename, source.chunk_id, source.confidence_score
                    );
                }
            }
            println!(
                "\nRetrieved {} chunks in {:.2}s total",
                answer.retrieval_stats.chunks_found,
                answer.performance.total_time.as_secs_f64()
            );
        }
        QueryResult::Failure(failure) => {
            println!("Query failed during {}: {}", failure.stage, failure.error);
        }
    }
}

pub async fn info(store: &StoreArgs, json: bool) -> anyhow::Result<bool> {
    let vector_store = open_store(store).await?;
    let info = vector_store.collection_info().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Collection:   {}", info.name);
        println!("Records:      {}", info.document_count);
        println!("Metric:       {}", info.distance_metric);
        match info.dimensions {
            Some(dimensions) => println!("Dimensions:   {dimensions}"),
            None => println!("Dimensions:   (empty)"),
        }
        println!("Storage path: {}", info.storage_path.as_deref().unwrap_or("-"));
        println!("Footprint:    {} bytes", info.footprint_bytes);
        println!("Created:      {}", info.created_at.to_rfc3339());
        println!("Queries:      {}", info.total_queries);
    }
    Ok(true)
}

pub async fn backup(store: &StoreArgs, destination: &Path, json: bool) -> anyhow::Result<bool> {
    let vector_store = open_store(store).await?;
    let backup = vector_store
        .backup(destination)
        .await
        .with_context(|| format!("failed to back up into '{}'", destination.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&backup)?);
    } else {
        println!(
            "Backed up {} records ({} bytes) to {}",
            backup.document_count,
            backup.backup_size,
            backup.backup_path.display()
        );
    }
    Ok(true)
}
