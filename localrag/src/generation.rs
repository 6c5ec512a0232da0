//! Answer-generation boundary.
//!
//! The query pipeline hands a [`GenerationRequest`] to an
//! [`AnswerGenerator`] and expects plain text back. The transport is up to
//! the implementation; [`generate_with_timeout`] bounds any of them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Returned in place of an empty completion.
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I apologize, but I was unable to generate a response based on the provided context.";

/// Model used when none is configured.
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.1:8b-instruct-q4_K_M";

/// Default bound on a single generation call.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling options forwarded to the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.1, top_p: 0.9, max_tokens: 500 }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub options: GenerationOptions,
}

/// A text-generation collaborator.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Return the raw completion for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Name used in errors and logs.
    fn service_name(&self) -> &str {
        "generator"
    }
}

/// Run `generator` with an upper bound on wall-clock time.
///
/// # Errors
///
/// Returns [`RagError::Timeout`] if `timeout` elapses first; generator
/// errors pass through.
pub async fn generate_with_timeout(
    generator: &dyn AnswerGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout { service: generator.service_name().to_string(), timeout }),
    }
}

/// Build the grounded-answer prompt.
///
/// The model is told to answer only from `context`, cite `[Source N]`
/// labels, and say so plainly when the context holds nothing relevant.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a document analyst. Answer using only the documents provided below, \
not general knowledge.

Instructions:
1. Read all of the document data before answering.
2. For comparisons, compare the values that appear in the documents.
3. Answer directly when the documents support a clear conclusion.
4. If the documents contain no relevant information, say that you cannot find it in the provided documents.
5. Cite every finding with its [Source N] label.

DOCUMENT DATA:
{context}

QUESTION: {question}

ANSWER:"
    )
}
