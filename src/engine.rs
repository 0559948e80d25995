//! The sync engine: every boundary operation in one place.
//!
//! [`SyncEngine`] owns the ledger, the vector index and the pipeline, and
//! enforces the startup ordering:
//!
//! 1. [`open`](SyncEngine::open) loads the ledger and connects the index.
//! 2. [`startup`](SyncEngine::startup) removes deleted files, ingests new
//!    and changed ones, then marks the engine ready.
//! 3. [`start_watcher`](SyncEngine::start_watcher) begins live monitoring.
//!
//! Until step 2 finishes, mutating calls fail with
//! [`SyncError::NotReady`]. Reads (search, status, document listing) are
//! always served.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use docsync_core::chunk::TextSplitter;
use docsync_core::index::{InMemoryIndex, VectorIndex};
use docsync_core::models::SearchHit;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{SyncError, SyncResult};
use crate::extract::FileExtractor;
use crate::ledger::{persist, ChangeLedger, SharedLedger};
use crate::locks::PathLocks;
use crate::pipeline::IngestionPipeline;
use crate::progress::{NoProgress, SyncProgressReporter};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::sqlite_index::SqliteIndex;
use crate::walker::FileFilter;
use crate::watcher::{DispatcherState, WatchDispatcher};

/// One row of the document listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentSummary {
    pub path: String,
    pub fingerprint: String,
    pub last_processed_at: DateTime<Utc>,
    pub chunks: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IndexStats {
    pub chunks: usize,
    pub sources: usize,
}

/// Result of deleting a document through the API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeletedDocument {
    pub path: String,
    pub file_removed: bool,
    pub was_indexed: bool,
}

pub struct SyncEngine {
    config: Config,
    ledger: SharedLedger,
    index: Arc<dyn VectorIndex>,
    filter: Arc<FileFilter>,
    pipeline: Arc<IngestionPipeline>,
    reconciler: Reconciler,
    ready: AtomicBool,
    reconcile_lock: Mutex<()>,
    watcher: Mutex<Option<WatchDispatcher>>,
    started_at: Instant,
}

impl SyncEngine {
    /// Build an engine whose index is chosen by `[index].backend`.
    pub async fn open(config: Config) -> SyncResult<Self> {
        Self::open_with_progress(config, Arc::new(NoProgress)).await
    }

    pub async fn open_with_progress(
        config: Config,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> SyncResult<Self> {
        let embedder =
            create_embedder(&config.embedding).map_err(SyncError::IndexUnavailable)?;
        let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
            "memory" => Arc::new(InMemoryIndex::new(embedder)),
            "sqlite" => Arc::new(
                SqliteIndex::open(&config.index.path, embedder)
                    .await
                    .map_err(SyncError::IndexUnavailable)?,
            ),
            other => {
                return Err(SyncError::Config(format!(
                    "unknown index backend '{}'",
                    other
                )))
            }
        };
        Self::with_index(config, index, progress)
    }

    /// Build an engine around an existing index.
    pub fn with_index(
        config: Config,
        index: Arc<dyn VectorIndex>,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> SyncResult<Self> {
        let docs = &config.paths.documents_dir;
        std::fs::create_dir_all(docs).map_err(|e| SyncError::io(docs, e))?;
        let state = &config.paths.state_dir;
        std::fs::create_dir_all(state).map_err(|e| SyncError::io(state, e))?;

        let ledger = ChangeLedger::load(
            config.paths.ledger_path(),
            config.paths.audit_log_path(),
        )?;
        info!(
            known_files = ledger.len(),
            path = %ledger.path().display(),
            "ledger loaded"
        );
        let ledger = ledger.into_shared();

        let filter = Arc::new(FileFilter::new(
            docs,
            &config.ingest.extensions,
            &config.ingest.exclude_globs,
        )?);
        let locks = Arc::new(PathLocks::new());
        let pipeline = Arc::new(
            IngestionPipeline::new(
                ledger.clone(),
                index.clone(),
                Arc::new(FileExtractor::new(config.ingest.max_file_size_bytes())),
                TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
                locks.clone(),
                config.ingest.batch_size,
            )
            .with_progress(progress.clone()),
        );
        let reconciler = Reconciler::new(ledger.clone(), index.clone(), filter.clone(), locks)
            .with_progress(progress);

        Ok(Self {
            config,
            ledger,
            index,
            filter,
            pipeline,
            reconciler,
            ready: AtomicBool::new(false),
            reconcile_lock: Mutex::new(()),
            watcher: Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    /// Initial reconciliation. Deletions run to completion before any
    /// ingestion starts; the engine is ready once both are done.
    pub async fn startup(&self) -> SyncResult<ReconcileReport> {
        let _pass = self.reconcile_lock.lock().await;
        self.check_embedding_model().await?;
        let report = self.reconciler.reconcile(&self.pipeline).await?;
        self.ready.store(true, Ordering::SeqCst);
        info!(
            deleted = report.deleted.len(),
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            unchanged = report.unchanged,
            "startup reconciliation complete"
        );
        Ok(report)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Begin live monitoring. A no-op when `[watcher].enabled` is false or
    /// a watcher is already running.
    pub async fn start_watcher(&self) -> SyncResult<()> {
        self.ensure_ready()?;
        if !self.config.watcher.enabled {
            info!("watcher disabled by configuration");
            return Ok(());
        }
        let mut slot = self.watcher.lock().await;
        if slot.is_none() {
            *slot = Some(WatchDispatcher::start(
                self.pipeline.clone(),
                self.filter.clone(),
                &self.config.watcher,
            )?);
        }
        Ok(())
    }

    pub async fn stop_watcher(&self) {
        let running = self.watcher.lock().await.take();
        if let Some(watcher) = running {
            watcher.shutdown().await;
            info!("watcher stopped");
        }
    }

    pub async fn watcher_state(&self) -> Option<DispatcherState> {
        self.watcher.lock().await.as_ref().map(|w| w.state())
    }

    /// Follow watcher state transitions while the watcher runs.
    pub async fn subscribe_watcher_state(&self) -> Option<watch::Receiver<DispatcherState>> {
        self.watcher.lock().await.as_ref().map(|w| w.subscribe_state())
    }

    pub async fn get_known_file_count(&self) -> usize {
        self.ledger.lock().await.len()
    }

    pub async fn get_last_processed_time(&self) -> Option<DateTime<Utc>> {
        self.ledger.lock().await.last_processed_at()
    }

    /// Run a full reconciliation pass. Passes never overlap.
    pub async fn trigger_reconciliation(&self) -> SyncResult<ReconcileReport> {
        self.ensure_ready()?;
        let _pass = self.reconcile_lock.lock().await;
        self.reconciler.reconcile(&self.pipeline).await
    }

    /// Drop `path` from the index and the ledger and save the ledger.
    /// The file on disk is left alone.
    pub async fn remove_and_persist(&self, path: &str) -> SyncResult<()> {
        self.ensure_ready()?;
        let key = self.filter.normalize(Path::new(path));
        if !self.ledger.lock().await.contains(&key) {
            return Err(SyncError::NotFound(path.to_string()));
        }
        self.pipeline.remove_file(&key).await?;
        persist(&self.ledger).await?;
        info!(path = %key, "document removed");
        Ok(())
    }

    /// Delete a document: the file on disk when it exists inside the
    /// documents directory, then its index and ledger entries.
    ///
    /// `path` may be absolute or relative to the documents directory.
    pub async fn delete_document(&self, path: &str) -> SyncResult<DeletedDocument> {
        self.ensure_ready()?;
        let key = self.resolve_inside_root(path)?;
        let was_indexed = self.ledger.lock().await.contains(&key);
        let on_disk = Path::new(&key).is_file();
        if !was_indexed && !on_disk {
            return Err(SyncError::NotFound(path.to_string()));
        }

        let mut file_removed = false;
        if on_disk {
            match tokio::fs::remove_file(&key).await {
                Ok(()) => file_removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::io(&key, e)),
            }
        }
        if was_indexed {
            // The watcher may already have dropped the entry after seeing
            // the file disappear; removal is idempotent either way.
            self.pipeline.remove_file(&key).await?;
            persist(&self.ledger).await?;
            info!(path = %key, "document deleted");
        }

        Ok(DeletedDocument {
            path: key,
            file_removed,
            was_indexed,
        })
    }

    pub async fn search(&self, query: &str, limit: usize) -> SyncResult<Vec<SearchHit>> {
        self.index
            .query(query, limit)
            .await
            .map_err(SyncError::Index)
    }

    /// Every ledger entry with its current chunk count, sorted by path.
    pub async fn known_files(&self) -> SyncResult<Vec<DocumentSummary>> {
        let counts: std::collections::HashMap<String, usize> = self
            .index
            .sources()
            .await
            .map_err(SyncError::Index)?
            .into_iter()
            .map(|s| (s.source, s.chunks))
            .collect();

        let ledger = self.ledger.lock().await;
        Ok(ledger
            .records()
            .iter()
            .map(|(path, record)| DocumentSummary {
                path: path.clone(),
                fingerprint: record.fingerprint.clone(),
                last_processed_at: record.last_processed_at,
                chunks: counts.get(path).copied().unwrap_or(0),
            })
            .collect())
    }

    pub async fn index_stats(&self) -> SyncResult<IndexStats> {
        let chunks = self.index.count().await.map_err(SyncError::Index)?;
        let sources = self.index.source_count().await.map_err(SyncError::Index)?;
        Ok(IndexStats { chunks, sources })
    }

    /// Background services currently running inside the engine.
    pub async fn services_running(&self) -> Vec<&'static str> {
        let mut services = vec!["vector_store"];
        if self.watcher.lock().await.is_some() {
            services.push("file_watcher");
        }
        services
    }

    /// Bytes on disk under the documents directory, the state directory
    /// and, for the SQLite backend, the index directory.
    pub async fn storage_used_bytes(&self) -> SyncResult<u64> {
        let mut roots = vec![
            self.filter.root().to_path_buf(),
            self.config.paths.state_dir.clone(),
        ];
        if self.config.index.backend == "sqlite" {
            if let Some(dir) = self.config.index.path.parent() {
                roots.push(dir.to_path_buf());
            }
        }
        Ok(tokio::task::spawn_blocking(move || disk_usage(&roots)).await?)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn documents_root(&self) -> &Path {
        self.filter.root()
    }

    /// Vectors from another model can never match a query, so when the
    /// configured model differs from the one the ledger recorded, every
    /// indexed source is dropped and the ledger forgets every file. The
    /// reconciliation that follows indexes the whole tree again.
    async fn check_embedding_model(&self) -> SyncResult<()> {
        let Some(current) = self.index.embedding_model() else {
            return Ok(());
        };
        let recorded = self.ledger.lock().await.embedding_model().cloned();
        match recorded {
            Some(previous) if previous == current => return Ok(()),
            Some(previous) => {
                warn!(%previous, %current, "embedding model changed, re-indexing every document");
                let sources = self.index.sources().await.map_err(SyncError::Index)?;
                for source in sources {
                    self.index
                        .delete(&source.source)
                        .await
                        .map_err(SyncError::Index)?;
                }
                self.ledger.lock().await.clear();
            }
            None => debug!(%current, "recording embedding model"),
        }
        self.ledger.lock().await.set_embedding_model(current);
        persist(&self.ledger).await
    }

    fn ensure_ready(&self) -> SyncResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            warn!("rejecting mutation before startup reconciliation finished");
            Err(SyncError::NotReady)
        }
    }

    fn resolve_inside_root(&self, path: &str) -> SyncResult<String> {
        let candidate = PathBuf::from(path);
        let joined = if candidate.is_absolute() {
            candidate
        } else {
            self.filter.root().join(candidate)
        };
        let key = self.filter.normalize(&joined);
        let escapes = Path::new(&key)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !Path::new(&key).starts_with(self.filter.root()) {
            return Err(SyncError::OutsideRoot(path.to_string()));
        }
        Ok(key)
    }
}

/// Total size of the regular files under `roots`. Roots nested inside
/// another root are counted once.
fn disk_usage(roots: &[PathBuf]) -> u64 {
    let mut roots: Vec<PathBuf> = roots
        .iter()
        .filter_map(|r| r.canonicalize().ok())
        .collect();
    roots.sort();
    roots.dedup();
    let outer: Vec<&PathBuf> = roots
        .iter()
        .filter(|r| !roots.iter().any(|o| o != *r && r.starts_with(o)))
        .collect();

    outer
        .into_iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.documents_dir = dir.path().join("docs");
        config.paths.state_dir = dir.path().join("state");
        config.index.backend = "memory".to_string();
        config.embedding.dims = Some(64);
        config
    }

    #[tokio::test]
    async fn test_mutations_rejected_before_startup() {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::open(config(&dir)).await.unwrap();
        assert!(!engine.is_ready());

        let err = engine.trigger_reconciliation().await.unwrap_err();
        assert!(matches!(err, SyncError::NotReady));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(engine.start_watcher().await.is_err());
        assert!(engine.remove_and_persist("a.txt").await.is_err());

        // Reads are served.
        assert_eq!(engine.get_known_file_count().await, 0);
        assert!(engine.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_outside_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::open(config(&dir)).await.unwrap();
        engine.startup().await.unwrap();

        let outside = dir.path().join("state").join("signatures.json");
        let err = engine
            .delete_document(&outside.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::OutsideRoot(_)));

        let err = engine.delete_document("../state/x.txt").await.unwrap_err();
        assert!(matches!(err, SyncError::OutsideRoot(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::open(config(&dir)).await.unwrap();
        engine.startup().await.unwrap();
        let err = engine.delete_document("nope.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_disk_usage_counts_nested_roots_once() {
        let dir = TempDir::new().unwrap();
        let outer = dir.path().join("data");
        let inner = outer.join("processed");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(outer.join("a.txt"), vec![b'a'; 1000]).unwrap();
        std::fs::write(inner.join("b.json"), vec![b'b'; 24]).unwrap();

        assert_eq!(disk_usage(&[outer.clone(), inner.clone()]), 1024);
        assert_eq!(disk_usage(&[inner, dir.path().join("missing")]), 24);
    }

    #[tokio::test]
    async fn test_services_follow_watcher_lifecycle() {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::open(config(&dir)).await.unwrap();
        engine.startup().await.unwrap();
        assert_eq!(engine.services_running().await, vec!["vector_store"]);

        engine.start_watcher().await.unwrap();
        assert_eq!(
            engine.services_running().await,
            vec!["vector_store", "file_watcher"]
        );
        engine.stop_watcher().await;
        assert_eq!(engine.services_running().await, vec!["vector_store"]);
    }

    #[tokio::test]
    async fn test_embedding_model_change_reindexes_everything() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.index.backend = "sqlite".to_string();
        config.index.path = dir.path().join("index.sqlite");
        std::fs::create_dir_all(&config.paths.documents_dir).unwrap();
        std::fs::write(
            config.paths.documents_dir.join("tides.md"),
            "spring tides follow the new moon",
        )
        .unwrap();

        {
            let engine = SyncEngine::open(config.clone()).await.unwrap();
            let report = engine.startup().await.unwrap();
            assert_eq!(report.processed.len(), 1);
        }

        config.embedding.dims = Some(32);
        let engine = SyncEngine::open(config.clone()).await.unwrap();
        let report = engine.startup().await.unwrap();
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.unchanged, 0);
        assert_eq!(engine.index_stats().await.unwrap().chunks, 1);
        let hits = engine.search("spring tides", 1).await.unwrap();
        assert_eq!(hits.len(), 1);

        // Same model again: nothing to do.
        drop(engine);
        let engine = SyncEngine::open(config).await.unwrap();
        let report = engine.startup().await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(&config.paths.state_dir).unwrap();
        std::fs::write(config.paths.ledger_path(), "{ not json").unwrap();
        let err = SyncEngine::open(config).await.err().unwrap();
        assert!(err.is_fatal());
    }
}
