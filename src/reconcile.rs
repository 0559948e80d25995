//! Ledger versus filesystem reconciliation.
//!
//! Both algorithms are set operations over the ledger's key set and a
//! fresh listing of the documents directory (same walk and filter rules
//! as the watcher):
//!
//! - [`Reconciler::files_to_process`]: listed files whose fingerprint the
//!   ledger does not know.
//! - [`Reconciler::sync_and_get_deleted_files`]: ledger keys that are no
//!   longer listed; each is deleted from the index, then from the ledger.
//!
//! A full pass runs deletions to completion before any ingestion starts.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use docsync_core::index::VectorIndex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::fingerprint::fingerprint;
use crate::ledger::{persist, SharedLedger};
use crate::locks::PathLocks;
use crate::pipeline::{BatchReport, FailedFile, IngestionPipeline};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::walker::FileFilter;

/// Summary of one full reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deleted: Vec<String>,
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFile>,
    /// Listed files whose fingerprint matched the ledger.
    pub unchanged: usize,
}

impl ReconcileReport {
    /// True if the pass wrote nothing to the index.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.processed.is_empty()
    }
}

pub struct Reconciler {
    ledger: SharedLedger,
    index: Arc<dyn VectorIndex>,
    filter: Arc<FileFilter>,
    locks: Arc<PathLocks>,
    progress: Arc<dyn SyncProgressReporter>,
}

impl Reconciler {
    pub fn new(
        ledger: SharedLedger,
        index: Arc<dyn VectorIndex>,
        filter: Arc<FileFilter>,
        locks: Arc<PathLocks>,
    ) -> Self {
        Self {
            ledger,
            index,
            filter,
            locks,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn filter(&self) -> &Arc<FileFilter> {
        &self.filter
    }

    /// Walk the documents directory and return every accepted file whose
    /// current fingerprint differs from the ledger, sorted by path.
    ///
    /// Files that cannot be fingerprinted are logged and left out; they are
    /// retried on the next pass.
    pub async fn files_to_process(&self) -> SyncResult<Vec<String>> {
        Ok(self.scan_changes().await?.0)
    }

    /// Remove every ledger entry whose file is gone from disk, deleting its
    /// chunks from the index first, and save the ledger once. Returns the
    /// removed paths, sorted.
    ///
    /// An entry whose index delete fails stays in the ledger so the next
    /// pass tries again.
    pub async fn sync_and_get_deleted_files(&self) -> SyncResult<Vec<String>> {
        self.progress.report(SyncProgressEvent::Discovering {
            root: self.filter.root().display().to_string(),
        });
        let on_disk = self.list().await?;
        let stale: Vec<String> = {
            let ledger = self.ledger.lock().await;
            ledger
                .paths()
                .filter(|p| !on_disk.contains(*p))
                .cloned()
                .collect()
        };

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let total = stale.len() as u64;
        let mut deleted = Vec::with_capacity(stale.len());
        for (i, path) in stale.into_iter().enumerate() {
            let _guard = self.locks.lock(&path).await;
            // The listing predates the lock; the file may be back by now.
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(path = %path, "reappeared before removal, keeping");
                continue;
            }
            match self.index.delete(&path).await {
                Ok(chunks) => {
                    self.ledger.lock().await.remove(&path);
                    debug!(path = %path, chunks, "removed deleted file from index");
                    deleted.push(path);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "index delete failed, will retry next pass");
                }
            }
            self.progress.report(SyncProgressEvent::Removing {
                n: i as u64 + 1,
                total,
            });
        }

        persist(&self.ledger).await?;
        info!(count = deleted.len(), "removed deleted files");
        Ok(deleted)
    }

    /// Full pass: deletions first, then ingestion of new and changed files.
    pub async fn reconcile(&self, pipeline: &Arc<IngestionPipeline>) -> SyncResult<ReconcileReport> {
        let deleted = self.sync_and_get_deleted_files().await?;
        let (changed, unchanged) = self.scan_changes().await?;
        info!(
            deleted = deleted.len(),
            changed = changed.len(),
            unchanged,
            "reconciliation plan"
        );

        let BatchReport {
            processed,
            skipped,
            failed,
        } = pipeline.process_batch(&changed).await?;

        Ok(ReconcileReport {
            deleted,
            processed,
            skipped,
            failed,
            unchanged,
        })
    }

    /// Changed paths plus the number of unchanged ones.
    async fn scan_changes(&self) -> SyncResult<(Vec<String>, usize)> {
        let filter = Arc::clone(&self.filter);
        let current = tokio::task::spawn_blocking(move || -> SyncResult<Vec<(String, String)>> {
            let mut out = Vec::new();
            for path in filter.scan()? {
                match fingerprint(&PathBuf::from(&path)) {
                    Ok(fp) => out.push((path, fp)),
                    Err(e) => warn!(path = %path, error = %e, "cannot fingerprint, skipping"),
                }
            }
            Ok(out)
        })
        .await??;

        let ledger = self.ledger.lock().await;
        let total = current.len();
        let changed: Vec<String> = current
            .into_iter()
            .filter(|(path, fp)| ledger.is_changed(path, fp))
            .map(|(path, _)| path)
            .collect();
        let unchanged = total - changed.len();
        Ok((changed, unchanged))
    }

    async fn list(&self) -> SyncResult<BTreeSet<String>> {
        let filter = Arc::clone(&self.filter);
        tokio::task::spawn_blocking(move || filter.scan()).await?
    }
}
