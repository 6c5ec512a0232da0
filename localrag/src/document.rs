//! Data types for documents, chunks, stored records, and search results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single metadata value.
///
/// Metadata is restricted to scalar values. Anything structured (arrays,
/// objects, `null`) is carried as [`MetadataValue::Serialized`] JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    /// A plain string.
    Text(String),
    /// A signed integer.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A boolean flag.
    Bool(bool),
    /// A structured value serialized to JSON text.
    Serialized(String),
}

impl MetadataValue {
    /// Flatten an arbitrary JSON value into a metadata value.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => Self::Text(s),
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Serialized(n.to_string())
                }
            }
            other => Self::Serialized(other.to_string()),
        }
    }

    /// Return the string content for `Text` and `Serialized` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Serialized(s) => Some(s),
            _ => None,
        }
    }

    /// Return the value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Return the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Return the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Exact-match comparison used by metadata filters.
    ///
    /// Integers and floats compare numerically; all other variants must
    /// match in both kind and value.
    pub fn matches(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (Self::Integer(_) | Self::Float(_), Self::Integer(_) | Self::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Serialized(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Key-value metadata with typed scalar values, ordered by key.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Flatten a JSON object into [`Metadata`].
///
/// Scalars keep their type; arrays, objects, and `null` become
/// [`MetadataValue::Serialized`].
pub fn flatten_metadata(map: serde_json::Map<String, serde_json::Value>) -> Metadata {
    map.into_iter().map(|(k, v)| (k, MetadataValue::from_json(v))).collect()
}

/// A source document containing text content and metadata.
///
/// Loaders set `source` and `file_type`; any other fields are passed
/// through to every chunk cut from the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The text content of the document.
    pub content: String,
    /// Metadata associated with the document.
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: Metadata::new() }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` identifier, if the loader supplied one.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(MetadataValue::as_str)
    }
}

/// A bounded segment of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Position of this chunk in the order the chunker emitted it.
    pub chunk_id: usize,
    /// The text content of the chunk.
    pub content: String,
    /// Metadata inherited from the parent document plus chunk-specific fields.
    pub metadata: Metadata,
}

/// A [`Chunk`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedChunk {
    /// The embedded chunk.
    pub chunk: Chunk,
    /// The embedding vector.
    pub embedding: Vec<f32>,
    /// Identifier of the model that produced the embedding.
    pub model: String,
    /// Length of `embedding`.
    pub dimensions: usize,
    /// Whether `embedding` was scaled to unit L2 norm.
    pub normalized: bool,
}

/// A record handed to a vector store for insertion.
///
/// Records without an `id` receive a generated one on insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRecord {
    /// Optional caller-chosen identifier.
    pub id: Option<String>,
    /// The text to store.
    pub content: String,
    /// The embedding vector.
    pub embedding: Vec<f32>,
    /// Flattened metadata.
    pub metadata: Metadata,
}

impl From<EmbeddedChunk> for NewRecord {
    fn from(embedded: EmbeddedChunk) -> Self {
        let id = embedded
            .chunk
            .metadata
            .get("doc_id")
            .and_then(MetadataValue::as_str)
            .map(str::to_string);
        Self {
            id,
            content: embedded.chunk.content,
            embedding: embedded.embedding,
            metadata: embedded.chunk.metadata,
        }
    }
}

/// A record as persisted by a vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    /// Unique identifier within the collection.
    pub id: String,
    /// The stored text.
    pub content: String,
    /// The stored embedding vector.
    pub embedding: Vec<f32>,
    /// The stored metadata.
    pub metadata: Metadata,
}

/// A record returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the matched record.
    pub id: String,
    /// Text of the matched record.
    pub content: String,
    /// Metadata of the matched record.
    pub metadata: Metadata,
    /// Raw distance under the collection's metric (smaller is closer).
    pub distance: f32,
    /// `1 - distance`; only derived for cosine collections when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// `max(0, similarity)`; present whenever `similarity` is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattening_keeps_scalars_and_serializes_structures() {
        let value = json!({
            "source": "q1.txt",
            "page": 4,
            "ratio": 0.5,
            "final": true,
            "tags": ["a", "b"],
            "missing": null
        });
        let serde_json::Value::Object(map) = value else { unreachable!() };
        let metadata = flatten_metadata(map);

        assert_eq!(metadata["source"], MetadataValue::Text("q1.txt".into()));
        assert_eq!(metadata["page"], MetadataValue::Integer(4));
        assert_eq!(metadata["ratio"], MetadataValue::Float(0.5));
        assert_eq!(metadata["final"], MetadataValue::Bool(true));
        assert_eq!(metadata["tags"], MetadataValue::Serialized(r#"["a","b"]"#.into()));
        assert_eq!(metadata["missing"], MetadataValue::Serialized("null".into()));
    }

    #[test]
    fn numeric_values_match_across_kinds() {
        assert!(MetadataValue::Integer(3).matches(&MetadataValue::Float(3.0)));
        assert!(!MetadataValue::Text("3".into()).matches(&MetadataValue::Integer(3)));
    }
}
