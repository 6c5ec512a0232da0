//! Context assembly and source citations.

use serde::Serialize;

use crate::chunking::char_len;
use crate::document::SearchResult;

/// A chunk that would overflow the budget is truncated only if at least
/// this many characters of budget remain; otherwise assembly stops.
pub const MIN_TRUNCATION_CHARS: usize = 100;

/// Length of the content preview attached to each citation.
pub const PREVIEW_CHARS: usize = 100;

const ELLIPSIS: &str = "...";

/// Where one piece of the assembled context came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    /// Matches the `[Source N]` label in the context.
    pub source_id: usize,
    /// The record's `source` metadata, or `Unknown`.
    pub filename: String,
    pub chunk_id: String,
    /// Rounded to three decimals.
    pub confidence_score: f32,
    /// Raw store distance, rounded to three decimals.
    pub similarity_distance: f32,
    pub content_preview: String,
}

/// Context text ready for the prompt, with its citations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub context: String,
    pub sources: Vec<SourceCitation>,
    pub total_chunks_used: usize,
    /// Characters in `context`, labels and separators included. Labels
    /// are not charged against the budget, so this can exceed
    /// `max_context_length`.
    pub context_length: usize,
    /// Characters of chunk content; never more than `max_context_length`.
    pub content_length: usize,
}

/// Pack retrieved chunks into a labelled context string.
///
/// Chunks are taken closest first. The budget applies to chunk content:
/// once the running total would exceed `max_context_length`, the
/// overflowing chunk is cut to the remaining budget (ending in `...`) if
/// at least [`MIN_TRUNCATION_CHARS`] remain, and assembly stops otherwise.
/// Labels and separators are not charged against the budget.
pub fn assemble_context(results: &[SearchResult], max_context_length: usize) -> AssembledContext {
    let mut ordered: Vec<&SearchResult> = results.iter().collect();
    ordered.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut parts = Vec::new();
    let mut sources = Vec::new();
    let mut used = 0;

    for (i, result) in ordered.into_iter().enumerate() {
        let length = char_len(&result.content);
        let content = if used + length > max_context_length {
            let remaining = max_context_length.saturating_sub(used);
            if remaining < MIN_TRUNCATION_CHARS {
                break;
            }
            truncate_with_ellipsis(&result.content, remaining)
        } else {
            result.content.clone()
        };
        used += char_len(&content);

        let source_id = i + 1;
        parts.push(format!("[Source {source_id}]: {content}"));
        sources.push(SourceCitation {
            source_id,
            filename: result
                .metadata
                .get("source")
                .map(ToString::to_string)
                .unwrap_or_else(|| "Unknown".to_string()),
            chunk_id: result
                .metadata
                .get("chunk_id")
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("chunk_{i}")),
            confidence_score: round3(confidence(result)),
            similarity_distance: round3(result.distance),
            content_preview: preview(&content),
        });
    }

    let context = parts.join("\n\n");
    AssembledContext {
        context_length: char_len(&context),
        content_length: used,
        total_chunks_used: parts.len(),
        context,
        sources,
    }
}

/// `max(0, 1 - distance)` unless the store already supplied one.
fn confidence(result: &SearchResult) -> f32 {
    result.confidence_score.unwrap_or_else(|| (1.0 - result.distance).max(0.0))
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Cut `text` to `limit` characters, the last three being `...`.
fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut cut: String = text.chars().take(keep).collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// First [`PREVIEW_CHARS`] characters, with `...` appended if cut.
pub fn preview(text: &str) -> String {
    if char_len(text) > PREVIEW_CHARS {
        let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
        cut.push_str(ELLIPSIS);
        cut
    } else {
        text.to_string()
    }
}
