//! Core data types shared by the splitter, the indexes and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded slice of a document's extracted text, the unit stored in a
/// [`VectorIndex`](crate::index::VectorIndex).
///
/// Chunks are recomputed from the source file whenever its fingerprint
/// changes; they never outlive the index entry they were written to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic id derived from `(source_path, chunk_index)`, see [`chunk_id`].
    pub id: String,
    /// Text content.
    pub content: String,
    /// SHA-256 hex digest of `content`.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// Position metadata carried by every chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Canonical absolute path of the source file.
    pub source: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub produced_at: DateTime<Utc>,
}

/// A single similarity search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity clamped to `[0, 1]`; higher is better.
    pub score: f32,
}

/// Per-source summary reported by [`VectorIndex::sources`](crate::index::VectorIndex::sources).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
}

/// Identity of the embedding space an index was built in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingModel {
    pub name: String,
    pub dims: usize,
}

impl std::fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.dims)
    }
}

/// Namespace for chunk ids. Any fixed UUID works as long as it never changes.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d3e_8a4b_4c7d_9e0f_1a2b_3c4d_5e6f);

/// Derive the id for chunk `index` of `source`.
///
/// Re-adding a file with the same chunk count produces the same ids, so
/// stores keyed by id overwrite in place.
///
/// ```rust
/// use docsync_core::models::chunk_id;
///
/// assert_eq!(chunk_id("/docs/a.txt", 0), chunk_id("/docs/a.txt", 0));
/// assert_ne!(chunk_id("/docs/a.txt", 0), chunk_id("/docs/a.txt", 1));
/// ```
pub fn chunk_id(source: &str, index: usize) -> String {
    Uuid::new_v5(&CHUNK_NAMESPACE, format!("{}#{}", source, index).as_bytes()).to_string()
}
