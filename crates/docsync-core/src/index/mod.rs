//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only capability the sync engine needs
//! from a similarity store. Implementations must be `Send + Sync` and safe
//! to call concurrently from independent callers (the reconciler, the
//! filesystem watcher and the HTTP layer all hold the same instance).
//!
//! # Operations
//!
//! | Method | Contract |
//! |--------|----------|
//! | [`upsert`](VectorIndex::upsert) | Replace every chunk of `source`; old and new chunks are never visible together |
//! | [`delete`](VectorIndex::delete) | Remove every chunk of `source`; deleting an unknown source is not an error |
//! | [`query`](VectorIndex::query) | Top `k` hits by descending score, score in `[0, 1]` |
//! | [`count`](VectorIndex::count) | Total number of stored chunks |
//! | [`sources`](VectorIndex::sources) | Distinct indexed sources with their chunk counts |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, EmbeddingModel, SearchHit, SourceSummary};

pub use memory::InMemoryIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace all chunks stored for `source` with `chunks`.
    ///
    /// An empty `chunks` slice leaves `source` with no entries.
    async fn upsert(&self, source: &str, chunks: &[Chunk]) -> Result<()>;

    /// Remove all chunks for `source`, returning how many were removed.
    async fn delete(&self, source: &str) -> Result<usize>;

    /// Return up to `k` hits ordered by descending score.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize>;

    /// Distinct sources currently indexed, sorted by path.
    async fn sources(&self) -> Result<Vec<SourceSummary>>;

    /// Number of distinct sources currently indexed.
    async fn source_count(&self) -> Result<usize> {
        Ok(self.sources().await?.len())
    }

    /// Embedding model the stored vectors were produced with, if the index
    /// embeds at all. Vectors from different models are not comparable.
    fn embedding_model(&self) -> Option<EmbeddingModel> {
        None
    }
}

/// Sort hits by descending score and keep the best `k`. Equal scores are
/// ordered by source, then chunk index.
pub fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.metadata.source.cmp(&b.metadata.source))
            .then_with(|| a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
    });
    hits.truncate(k);
    hits
}
