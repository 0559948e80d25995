//! Ingestion pipeline: fingerprint, extract, split, upsert, record.
//!
//! [`IngestionPipeline::process_batch`] is the only way documents enter
//! the index, whether they come from a reconciliation pass or from a
//! watcher event. Files are handled in fixed-size sub-batches whose
//! members run concurrently; a failure in one file is logged and recorded
//! in the [`BatchReport`] without affecting the others. The ledger is
//! saved once, after the whole batch.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use docsync_core::chunk::TextSplitter;
use docsync_core::index::VectorIndex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::extract::TextExtractor;
use crate::fingerprint::fingerprint;
use crate::ledger::{persist, SharedLedger};
use crate::locks::PathLocks;
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Chunks were written to the index and the ledger updated.
    Indexed { chunks: usize },
    /// No text could be extracted; nothing was written.
    Empty,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Outcome of a [`process_batch`](IngestionPipeline::process_batch) call.
/// Every vector is sorted by path.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFile>,
}

impl BatchReport {
    fn sort(&mut self) {
        self.processed.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

pub struct IngestionPipeline {
    ledger: SharedLedger,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn TextExtractor>,
    splitter: TextSplitter,
    locks: Arc<PathLocks>,
    batch_size: usize,
    progress: Arc<dyn SyncProgressReporter>,
}

impl IngestionPipeline {
    pub fn new(
        ledger: SharedLedger,
        index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn TextExtractor>,
        splitter: TextSplitter,
        locks: Arc<PathLocks>,
        batch_size: usize,
    ) -> Self {
        Self {
            ledger,
            index,
            extractor,
            splitter,
            locks,
            batch_size: batch_size.max(1),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest every path in `paths`, then save the ledger once.
    ///
    /// Per-file failures end up in [`BatchReport::failed`]; only a failed
    /// ledger save is returned as an error.
    pub async fn process_batch(self: &Arc<Self>, paths: &[String]) -> SyncResult<BatchReport> {
        let mut report = BatchReport::default();
        if paths.is_empty() {
            return Ok(report);
        }

        let total = paths.len() as u64;
        let mut done = 0u64;

        for batch in paths.chunks(self.batch_size) {
            let mut pending: BTreeSet<String> = batch.iter().cloned().collect();
            let mut tasks = JoinSet::new();
            for path in batch {
                let this = Arc::clone(self);
                let path = path.clone();
                tasks.spawn(async move {
                    let outcome = this.process_file(&path).await;
                    (path, outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((path, outcome)) => {
                        pending.remove(&path);
                        match outcome {
                            Ok(FileOutcome::Indexed { chunks }) => {
                                debug!(path = %path, chunks, "indexed");
                                report.processed.push(path);
                            }
                            Ok(FileOutcome::Empty) => {
                                info!(path = %path, "no extractable text, skipped");
                                report.skipped.push(path);
                            }
                            Err(e) => {
                                warn!(path = %path, error = %e, kind = ?e.kind(), "failed to process file");
                                report.failed.push(FailedFile {
                                    path,
                                    error: e.to_string(),
                                });
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "ingestion task aborted"),
                }
                done += 1;
                self.progress
                    .report(SyncProgressEvent::Ingesting { n: done, total });
            }

            // Tasks that panicked never reported their path back.
            for path in pending {
                report.failed.push(FailedFile {
                    path,
                    error: "ingestion task aborted".to_string(),
                });
            }
        }

        persist(&self.ledger).await?;
        report.sort();
        Ok(report)
    }

    /// Ingest a single file while holding its path lock.
    ///
    /// The fingerprint is taken before extraction, so an edit racing with
    /// extraction leaves a stale fingerprint behind and is picked up again
    /// by the next pass.
    pub async fn process_file(&self, path: &str) -> SyncResult<FileOutcome> {
        let _guard = self.locks.lock(path).await;

        let file = PathBuf::from(path);
        let extractor = Arc::clone(&self.extractor);
        let (current, text) = tokio::task::spawn_blocking(move || -> SyncResult<_> {
            let current = fingerprint(&file)?;
            let text = extractor.extract(&file)?;
            Ok((current, text))
        })
        .await??;

        if text.trim().is_empty() {
            // A document that lost all of its text must not keep stale chunks.
            if self.ledger.lock().await.contains(path) {
                self.index.delete(path).await.map_err(SyncError::Index)?;
                self.ledger.lock().await.remove(path);
            }
            return Ok(FileOutcome::Empty);
        }

        let chunks = self.splitter.split_document(path, &text, Utc::now());
        self.index
            .upsert(path, &chunks)
            .await
            .map_err(SyncError::Index)?;
        self.ledger.lock().await.mark_processed(path, &current);

        Ok(FileOutcome::Indexed {
            chunks: chunks.len(),
        })
    }

    /// Remove `path` from the index, then from the ledger, under its path
    /// lock. The ledger is not saved. Returns whether the ledger knew it.
    ///
    /// If the index delete fails the ledger entry is kept, so the next
    /// reconciliation pass retries the removal.
    pub async fn remove_file(&self, path: &str) -> SyncResult<bool> {
        let _guard = self.locks.lock(path).await;
        let removed_chunks = self.index.delete(path).await.map_err(SyncError::Index)?;
        let known = self.ledger.lock().await.remove(path);
        debug!(path = %path, removed_chunks, known, "removed");
        Ok(known)
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }
}
