//! SQLite-backed [`VectorIndex`].
//!
//! One `chunks` row per chunk, with its embedding stored as a BLOB.
//! [`upsert`](VectorIndex::upsert) embeds first, then deletes and inserts
//! inside one transaction, so concurrent readers see either the old chunk
//! set or the new one. Queries are brute-force cosine similarity over
//! every stored vector produced by the current model.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use docsync_core::embedding::{blob_to_vec, embed_one, similarity_score, vec_to_blob, Embedder};
use docsync_core::index::{rank_hits, VectorIndex};
use docsync_core::models::{Chunk, ChunkMetadata, EmbeddingModel, SearchHit, SourceSummary};

use crate::db;
use crate::migrate;

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl SqliteIndex {
    /// Connect to (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open index database {}", path.display()))?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to apply index schema")?;
        Ok(Self { pool, embedder })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// One vector per chunk. Chunks whose content hash already has a
    /// vector from the current model under `source` reuse it; only the
    /// rest go to the embedder.
    async fn vectors_for(&self, source: &str, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let rows = sqlx::query(
            "SELECT hash, embedding FROM chunks WHERE source_path = ? AND model = ? AND dims = ?",
        )
        .bind(source)
        .bind(self.embedder.model_name())
        .bind(self.embedder.dims() as i64)
        .fetch_all(&self.pool)
        .await?;
        let cached: HashMap<String, Vec<f32>> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get::<String, _>("hash"), blob_to_vec(&blob))
            })
            .collect();

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| !cached.contains_key(&c.hash))
            .map(|c| c.content.clone())
            .collect();
        let fresh = if missing.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&missing).await?
        };
        if fresh.len() != missing.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} chunks",
                fresh.len(),
                missing.len()
            ));
        }
        debug!(
            source,
            reused = chunks.len() - missing.len(),
            embedded = missing.len(),
            "vectors prepared"
        );

        let mut fresh = fresh.into_iter();
        chunks
            .iter()
            .map(|c| match cached.get(&c.hash) {
                Some(v) => Ok(v.clone()),
                None => fresh
                    .next()
                    .ok_or_else(|| anyhow!("missing vector for chunk {}", c.id)),
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, source: &str, chunks: &[Chunk]) -> Result<()> {
        let vectors = self.vectors_for(source, chunks).await?;

        let model = self.embedder.model_name().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_path = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_path, chunk_index, total_chunks, content, hash,
                                    produced_at, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(source)
            .bind(chunk.metadata.chunk_index as i64)
            .bind(chunk.metadata.total_chunks as i64)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(chunk.metadata.produced_at.to_rfc3339())
            .bind(&model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, source: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_path = ?")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_one(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            r#"
            SELECT source_path, chunk_index, total_chunks, content, produced_at, embedding
            FROM chunks
            WHERE model = ? AND dims = ?
            "#,
        )
        .bind(self.embedder.model_name())
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let produced_at: String = row.get("produced_at");
                SearchHit {
                    content: row.get("content"),
                    metadata: ChunkMetadata {
                        source: row.get("source_path"),
                        chunk_index: row.get::<i64, _>("chunk_index") as usize,
                        total_chunks: row.get::<i64, _>("total_chunks") as usize,
                        produced_at: DateTime::parse_from_rfc3339(&produced_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_default(),
                    },
                    score: similarity_score(&query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn sources(&self) -> Result<Vec<SourceSummary>> {
        let rows = sqlx::query(
            "SELECT source_path, COUNT(*) AS n FROM chunks GROUP BY source_path ORDER BY source_path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| SourceSummary {
                source: row.get("source_path"),
                chunks: row.get::<i64, _>("n") as usize,
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
