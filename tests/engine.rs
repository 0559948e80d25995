//! Engine-level sync properties, run against an in-memory index wrapped in
//! a fake that counts mutations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use docsync::config::Config;
use docsync::engine::SyncEngine;
use docsync::error::ErrorKind;
use docsync::fingerprint::fingerprint;
use docsync::index::{InMemoryIndex, VectorIndex};
use docsync::ledger::ChangeLedger;
use docsync::models::{Chunk, SearchHit, SourceSummary};
use docsync::progress::NoProgress;
use docsync_core::embedding::HashEmbedder;
use tempfile::TempDir;

struct CountingIndex {
    inner: InMemoryIndex,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingIndex {
    fn new() -> Self {
        Self {
            inner: InMemoryIndex::new(Arc::new(HashEmbedder::new(128))),
            upserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    fn mutations(&self) -> usize {
        self.upserts.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn upsert(&self, source: &str, chunks: &[Chunk]) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(source, chunks).await
    }

    async fn delete(&self, source: &str) -> Result<usize> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(source).await
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.inner.query(text, k).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn sources(&self) -> Result<Vec<SourceSummary>> {
        self.inner.sources().await
    }
}

struct Env {
    _tmp: TempDir,
    config: Config,
    docs: PathBuf,
}

fn env() -> Env {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.paths.documents_dir = tmp.path().join("documents");
    config.paths.state_dir = tmp.path().join("processed");
    config.index.backend = "memory".to_string();
    config.index.path = tmp.path().join("index.sqlite");
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config.watcher.enabled = false;
    fs::create_dir_all(&config.paths.documents_dir).unwrap();
    let docs = config.paths.documents_dir.canonicalize().unwrap();
    Env {
        _tmp: tmp,
        config,
        docs,
    }
}

fn engine(env: &Env, index: &Arc<CountingIndex>) -> SyncEngine {
    SyncEngine::with_index(env.config.clone(), index.clone(), Arc::new(NoProgress)).unwrap()
}

fn write(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

fn set_mtime(path: &str, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

#[tokio::test]
async fn test_second_pass_without_changes_makes_no_mutations() {
    let env = env();
    write(&env.docs, "a.txt", "the first document");
    write(&env.docs, "b.md", "# Second\n\nanother document");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);

    let first = engine.startup().await.unwrap();
    assert_eq!(first.processed.len(), 2);
    let after_first = index.mutations();

    let second = engine.trigger_reconciliation().await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.unchanged, 2);
    assert_eq!(index.mutations(), after_first);
}

#[tokio::test]
async fn test_restart_with_persisted_ledger_makes_no_mutations() {
    let env = env();
    write(&env.docs, "a.txt", "persisted across restarts");
    {
        let index = Arc::new(CountingIndex::new());
        engine(&env, &index).startup().await.unwrap();
    }

    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    assert_eq!(engine.get_known_file_count().await, 1);
    let report = engine.startup().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(index.mutations(), 0);
}

#[test]
fn test_fingerprint_stable_for_small_and_large_files() {
    let env = env();
    let small = write(&env.docs, "small.txt", "tiny");
    let large = env.docs.join("large.txt");
    fs::write(&large, vec![b'x'; 3 * 1024 * 1024]).unwrap();

    let small = Path::new(&small);
    assert_eq!(fingerprint(small).unwrap(), fingerprint(small).unwrap());
    assert_eq!(fingerprint(&large).unwrap(), fingerprint(&large).unwrap());
}

#[tokio::test]
async fn test_content_edit_is_detected() {
    let env = env();
    let path = write(&env.docs, "a.txt", "version one");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    fs::write(&path, "version two, now longer").unwrap();
    let report = engine.trigger_reconciliation().await.unwrap();
    assert_eq!(report.processed, vec![path]);
}

#[tokio::test]
async fn test_mtime_only_change_is_detected() {
    let env = env();
    let path = write(&env.docs, "a.txt", "same bytes");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    set_mtime(&path, SystemTime::now() - Duration::from_secs(3600));
    let report = engine.trigger_reconciliation().await.unwrap();
    assert_eq!(report.processed, vec![path]);
}

#[tokio::test]
async fn test_deleted_file_leaves_ledger_and_index() {
    let env = env();
    let gone = write(&env.docs, "gone.txt", "soon to be deleted");
    write(&env.docs, "kept.txt", "stays around");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    fs::remove_file(&gone).unwrap();
    let report = engine.trigger_reconciliation().await.unwrap();
    assert_eq!(report.deleted, vec![gone.clone()]);

    let known: Vec<String> = engine
        .known_files()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.path)
        .collect();
    assert!(!known.contains(&gone));
    let sources = index.sources().await.unwrap();
    assert!(sources.iter().all(|s| s.source != gone));
}

#[tokio::test]
async fn test_reindex_replaces_chunks_in_place() {
    let env = env();
    let long: String = (0..40)
        .map(|i| format!("Paragraph {} talks about obsolete widgets.\n\n", i))
        .collect();
    let path = write(&env.docs, "doc.md", &long);
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();
    let before = index.count().await.unwrap();
    assert!(before > 1);

    fs::write(&path, "A single short paragraph about gardening.").unwrap();
    engine.trigger_reconciliation().await.unwrap();

    assert_eq!(index.count().await.unwrap(), 1);
    let hits = engine.search("obsolete widgets", 10).await.unwrap();
    assert!(hits.iter().all(|h| !h.content.contains("widgets")));
}

#[tokio::test]
async fn test_two_files_give_two_sources_and_two_records() {
    let env = env();
    write(&env.docs, "doc1.txt", "first document content");
    write(&env.docs, "doc2.txt", "second document content");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    assert_eq!(index.source_count().await.unwrap(), 2);
    let ledger = ChangeLedger::load(
        env.config.paths.ledger_path(),
        env.config.paths.audit_log_path(),
    )
    .unwrap();
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn test_live_document_added_then_deleted() {
    let env = env();
    write(&env.docs, "doc1.txt", "first document content");
    write(&env.docs, "doc2.txt", "second document content");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    let live = write(&env.docs, "live_doc.txt", "zebra quasar marmalade");
    engine.trigger_reconciliation().await.unwrap();
    assert_eq!(engine.get_known_file_count().await, 3);

    fs::remove_file(&live).unwrap();
    engine.trigger_reconciliation().await.unwrap();
    assert_eq!(engine.get_known_file_count().await, 2);
    let hits = engine.search("zebra quasar marmalade", 10).await.unwrap();
    assert!(hits.iter().all(|h| h.metadata.source != live));
}

#[tokio::test]
async fn test_large_file_middle_edit_goes_unnoticed() {
    let mut env = env();
    env.config.chunking.chunk_size = 16 * 1024;
    env.config.chunking.chunk_overlap = 0;
    let path = env.docs.join("big.txt");
    let mut bytes: Vec<u8> = b"lorem ipsum dolor sit amet\n"
        .iter()
        .copied()
        .cycle()
        .take(2 * 1024 * 1024)
        .collect();
    fs::write(&path, &bytes).unwrap();
    let path_str = path.to_string_lossy().into_owned();

    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();
    let before = fingerprint(&path).unwrap();
    let mtime = fs::metadata(&path).unwrap().modified().unwrap();

    // Same size, same edges, same mtime: only the middle differs.
    bytes[1024 * 1024] = b'b';
    fs::write(&path, &bytes).unwrap();
    set_mtime(&path_str, mtime);

    assert_eq!(fingerprint(&path).unwrap(), before);
    let report = engine.trigger_reconciliation().await.unwrap();
    assert!(report.processed.is_empty());
}

#[tokio::test]
async fn test_remove_and_persist() {
    let env = env();
    let path = write(&env.docs, "a.txt", "to be forgotten");
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);
    engine.startup().await.unwrap();

    engine.remove_and_persist("a.txt").await.unwrap();
    assert!(Path::new(&path).exists());
    assert_eq!(index.count().await.unwrap(), 0);

    let ledger = ChangeLedger::load(
        env.config.paths.ledger_path(),
        env.config.paths.audit_log_path(),
    )
    .unwrap();
    assert!(!ledger.contains(&path));

    let err = engine.remove_and_persist("a.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_failed_file_is_retried_next_pass() {
    let mut env = env();
    env.config.ingest.max_file_size_mb = 1;
    let big = env.docs.join("big.txt");
    fs::write(&big, vec![b'z'; 1024 * 1024 + 1]).unwrap();
    let index = Arc::new(CountingIndex::new());
    let engine = engine(&env, &index);

    let first = engine.startup().await.unwrap();
    assert_eq!(first.failed.len(), 1);
    assert_eq!(engine.get_known_file_count().await, 0);

    fs::write(&big, "small now").unwrap();
    let second = engine.trigger_reconciliation().await.unwrap();
    assert_eq!(second.processed.len(), 1);
}

#[tokio::test]
async fn test_audit_log_records_processed_files() {
    let env = env();
    let path = write(&env.docs, "a.txt", "audited");
    let index = Arc::new(CountingIndex::new());
    engine(&env, &index).startup().await.unwrap();

    let log = fs::read_to_string(env.config.paths.audit_log_path()).unwrap();
    assert!(log.contains(&format!(" - Processed: {}", path)));
}
