//! In-memory [`VectorIndex`] implementation for tests and ephemeral runs.
//!
//! Chunks and their vectors live in a `Vec` behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over all stored vectors.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{embed_one, similarity_score, Embedder};
use crate::models::{Chunk, EmbeddingModel, SearchHit, SourceSummary};

use super::{rank_hits, VectorIndex};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// In-memory index. `upsert` swaps a source's chunks under a single write
/// lock, so readers see either the old set or the new one.
pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Ids of every stored chunk, in insertion order.
    pub fn chunk_ids(&self) -> Result<Vec<String>> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        Ok(stored.iter().map(|s| s.chunk.id.clone()).collect())
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, source: &str, chunks: &[Chunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }

        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        stored.retain(|s| s.chunk.metadata.source != source);
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector,
            });
        }
        Ok(())
    }

    async fn delete(&self, source: &str) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|s| s.chunk.metadata.source != source);
        Ok(before - stored.len())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;

        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let hits = stored
            .iter()
            .map(|s| SearchHit {
                content: s.chunk.content.clone(),
                metadata: s.chunk.metadata.clone(),
                score: similarity_score(&query_vec, &s.vector),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().map_err(|_| poisoned())?.len())
    }

    async fn sources(&self) -> Result<Vec<SourceSummary>> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for s in stored.iter() {
            *counts.entry(s.chunk.metadata.source.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(source, chunks)| SourceSummary {
                source: source.to_string(),
                chunks,
            })
            .collect())
    }

    fn embedding_model(&self) -> Option<EmbeddingModel> {
        Some(EmbeddingModel {
            name: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
        })
    }
}
