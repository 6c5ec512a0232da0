//! Query orchestrator.
//!
//! [`QueryPipeline`] answers one question at a time: embed the question,
//! retrieve the closest chunks, assemble a bounded context, and ask the
//! [`AnswerGenerator`]. Every failure is caught and returned as a
//! [`QueryFailure`] naming the stage; nothing is retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use localrag::{QueryPipeline, RagConfig};
//!
//! let pipeline = QueryPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(provider)
//!     .vector_store(store)
//!     .generator(Arc::new(OllamaGenerator::new(&OllamaConfig::default())?))
//!     .build()?;
//!
//! match pipeline.ask("What are the Q1 budget projections?").await {
//!     QueryResult::Answer(answer) => println!("{}", answer.response),
//!     QueryResult::Failure(failure) => eprintln!("{}", failure.error),
//! }
//! ```

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::chunking::char_len;
use crate::config::RagConfig;
use crate::context::{SourceCitation, assemble_context};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{ErrorKind, RagError, Result};
use crate::generation::{
    AnswerGenerator, DEFAULT_GENERATION_MODEL, DEFAULT_GENERATION_TIMEOUT, EMPTY_RESPONSE_FALLBACK,
    GenerationOptions, GenerationRequest, build_prompt, generate_with_timeout,
};
use crate::vectorstore::{MetadataFilter, VectorStore};

/// Characters of assembled context echoed back in a [`QueryAnswer`].
pub const CONTEXT_PREVIEW_CHARS: usize = 200;

/// Stages of one query, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    EmbedQuery,
    Retrieve,
    AssembleContext,
    Generate,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmbedQuery => "embed_query",
            Self::Retrieve => "retrieve",
            Self::AssembleContext => "assemble_context",
            Self::Generate => "generate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalStats {
    pub chunks_found: usize,
    /// Similarity of the closest chunk, if any was found.
    pub top_similarity_score: Option<f32>,
    pub context_length: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueryPerformance {
    pub embedding_time: Duration,
    pub retrieval_time: Duration,
    pub generation_time: Duration,
    pub total_time: Duration,
}

/// A successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub query: String,
    pub response: String,
    pub sources: Vec<SourceCitation>,
    /// Leading part of the context sent to the generator.
    pub context_used: String,
    pub retrieval_stats: RetrievalStats,
    pub performance: QueryPerformance,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// A query that failed at some stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryFailure {
    pub query: String,
    pub error: String,
    pub stage: QueryStage,
    pub kind: ErrorKind,
    /// Time spent before the failure.
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Outcome of [`QueryPipeline::ask`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Answer(QueryAnswer),
    Failure(QueryFailure),
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Answer(_))
    }

    pub fn answer(&self) -> Option<&QueryAnswer> {
        match self {
            Self::Answer(answer) => Some(answer),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&QueryFailure> {
        match self {
            Self::Answer(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

/// Running totals for a [`QueryPipeline`].
///
/// Retrieval and generation averages cover successful queries only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub queries_processed: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_query_time: Duration,
    pub average_total_time: Duration,
    pub average_retrieval_time: Duration,
    pub average_generation_time: Duration,
    /// Percentage of successful queries.
    pub success_rate: f64,
}

impl QueryStats {
    /// Snapshot after a successful query.
    pub fn record_success(&self, performance: &QueryPerformance) -> Self {
        let successful = self.successful_queries + 1;
        let next = Self {
            successful_queries: successful,
            average_retrieval_time: running_average(
                self.average_retrieval_time,
                performance.retrieval_time,
                successful,
            ),
            average_generation_time: running_average(
                self.average_generation_time,
                performance.generation_time,
                successful,
            ),
            ..self.clone()
        };
        next.with_query(performance.total_time)
    }

    /// Snapshot after a failed query.
    pub fn record_failure(&self, elapsed: Duration) -> Self {
        Self { failed_queries: self.failed_queries + 1, ..self.clone() }.with_query(elapsed)
    }

    fn with_query(mut self, elapsed: Duration) -> Self {
        self.queries_processed += 1;
        self.total_query_time += elapsed;
        self.average_total_time =
            self.total_query_time / u32::try_from(self.queries_processed).unwrap_or(u32::MAX);
        self.success_rate = self.successful_queries as f64 / self.queries_processed as f64 * 100.0;
        self
    }
}

fn running_average(previous: Duration, sample: Duration, count: usize) -> Duration {
    let Ok(n) = u32::try_from(count) else {
        return previous;
    };
    if n == 0 {
        return Duration::ZERO;
    }
    (previous * (n - 1) + sample) / n
}

/// Answers questions against one collection.
///
/// Construct one via [`QueryPipeline::builder()`]. Independent queries
/// share no mutable state apart from the statistics snapshot.
pub struct QueryPipeline {
    config: RagConfig,
    embedder: Arc<Embedder>,
    vector_store: Arc<dyn VectorStore>,
    generator: Arc<dyn AnswerGenerator>,
    model: String,
    options: GenerationOptions,
    timeout: Duration,
    stats: RwLock<QueryStats>,
}

impl QueryPipeline {
    pub fn builder() -> QueryPipelineBuilder {
        QueryPipelineBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `question` from the whole collection.
    pub async fn ask(&self, question: &str) -> QueryResult {
        self.ask_filtered(question, None).await
    }

    /// Answer `question` using only chunks whose metadata satisfies `filter`.
    pub async fn ask_filtered(&self, question: &str, filter: Option<&MetadataFilter>) -> QueryResult {
        let started = Instant::now();
        info!(query = question, top_k = self.config.top_k, "processing query");

        match self.execute(question, filter, started).await {
            Ok(answer) => {
                self.update_stats(|s| s.record_success(&answer.performance));
                info!(
                    chunks = answer.retrieval_stats.chunks_found,
                    total_ms = answer.performance.total_time.as_millis() as u64,
                    "query answered"
                );
                QueryResult::Answer(answer)
            }
            Err((stage, e)) => {
                let elapsed = started.elapsed();
                self.update_stats(|s| s.record_failure(elapsed));
                error!(%stage, error = %e, "query failed");
                QueryResult::Failure(QueryFailure {
                    query: question.to_string(),
                    error: e.to_string(),
                    stage,
                    kind: e.kind(),
                    elapsed,
                    timestamp: Utc::now(),
                    success: false,
                })
            }
        }
    }

    async fn execute(
        &self,
        question: &str,
        filter: Option<&MetadataFilter>,
        started: Instant,
    ) -> std::result::Result<QueryAnswer, (QueryStage, RagError)> {
        let stage_start = Instant::now();
        let query_vector =
            self.embedder.embed_one(question).await.map_err(|e| (QueryStage::EmbedQuery, e))?;
        let embedding_time = stage_start.elapsed();

        let stage_start = Instant::now();
        let results = self
            .vector_store
            .similarity_search(&query_vector, self.config.top_k, filter, true)
            .await
            .map_err(|e| (QueryStage::Retrieve, e))?;
        let retrieval_time = stage_start.elapsed();
        debug!(found = results.len(), "retrieved chunks");

        let assembled = assemble_context(&results, self.config.max_context_length);

        let stage_start = Instant::now();
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: build_prompt(question, &assembled.context),
            options: self.options,
        };
        let generated = generate_with_timeout(self.generator.as_ref(), &request, self.timeout)
            .await
            .map_err(|e| (QueryStage::Generate, e))?;
        let generation_time = stage_start.elapsed();

        let response = match generated.trim() {
            "" => EMPTY_RESPONSE_FALLBACK.to_string(),
            text => text.to_string(),
        };

        let top_similarity_score = results
            .iter()
            .map(|r| r.similarity.unwrap_or(1.0 - r.distance))
            .max_by(f32::total_cmp);

        Ok(QueryAnswer {
            query: question.to_string(),
            response,
            context_used: context_preview(&assembled.context),
            retrieval_stats: RetrievalStats {
                chunks_found: results.len(),
                top_similarity_score,
                context_length: assembled.context_length,
            },
            sources: assembled.sources,
            performance: QueryPerformance {
                embedding_time,
                retrieval_time,
                generation_time,
                total_time: started.elapsed(),
            },
            timestamp: Utc::now(),
            success: true,
        })
    }

    pub fn stats(&self) -> QueryStats {
        match self.stats.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_stats(&self, update: impl FnOnce(&QueryStats) -> QueryStats) {
        let mut guard = match self.stats.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = update(&guard);
    }
}

fn context_preview(context: &str) -> String {
    if char_len(context) > CONTEXT_PREVIEW_CHARS {
        let mut cut: String = context.chars().take(CONTEXT_PREVIEW_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        context.to_string()
    }
}

/// Builder for constructing a [`QueryPipeline`].
///
/// `config`, an embedder (or `embedding_provider`), `vector_store` and
/// `generator` are required. The model defaults to
/// [`DEFAULT_GENERATION_MODEL`] and the timeout to 30 seconds.
#[derive(Default)]
pub struct QueryPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    embedder: Option<Arc<Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    model: Option<String>,
    options: Option<GenerationOptions>,
    timeout: Option<Duration>,
}

impl QueryPipelineBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn embedder(mut self, embedder: Arc<Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the generation model identifier.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Bound each generation call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`QueryPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing.
    pub fn build(self) -> Result<QueryPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        let embedder = match (self.embedder, self.embedding_provider) {
            (Some(embedder), _) => embedder,
            (None, Some(provider)) => Arc::new(Embedder::from_config(provider, &config)?),
            (None, None) => {
                return Err(RagError::ConfigError("embedding_provider is required".to_string()));
            }
        };
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::ConfigError("generator is required".to_string()))?;

        Ok(QueryPipeline {
            config,
            embedder,
            vector_store,
            generator,
            model: self.model.unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            options: self.options.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(DEFAULT_GENERATION_TIMEOUT),
            stats: RwLock::new(QueryStats::default()),
        })
    }
}
