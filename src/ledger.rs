//! Durable change ledger.
//!
//! Maps every successfully processed file to the fingerprint it had at the
//! time, so later passes can skip unchanged files. The whole mapping is
//! rewritten on every [`persist`] by writing a sibling
//! temp file and renaming it over `signatures.json`; a reader never sees a
//! half-written ledger.
//!
//! Every [`mark_processed`](ChangeLedger::mark_processed) also queues a
//! line for `processing.log`, appended on the next [`persist`]. That log
//! is an audit trail only: failures to write it are logged and otherwise
//! ignored.
//!
//! [`persist`] serializes under the ledger lock and does the file I/O on
//! the blocking pool after releasing it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsync_core::models::EmbeddingModel;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Ledger shared between the reconciler, the pipeline, the watcher and
/// the HTTP layer.
pub type SharedLedger = Arc<tokio::sync::Mutex<ChangeLedger>>;

const LEDGER_VERSION: u32 = 1;

/// One known file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub fingerprint: String,
    pub last_processed_at: DateTime<Utc>,
}

/// On-disk shape of `signatures.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    last_processed_at: Option<DateTime<Utc>>,
    /// Model the indexed vectors were produced with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<EmbeddingModel>,
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
}

#[derive(Debug)]
pub struct ChangeLedger {
    path: PathBuf,
    audit_log: PathBuf,
    records: BTreeMap<String, FileRecord>,
    last_processed_at: Option<DateTime<Utc>>,
    embedding: Option<EmbeddingModel>,
    pending_audit: Vec<String>,
    // Held across snapshot and write so saves land on disk in order.
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

/// Serialized ledger plus queued audit lines, ready to be written without
/// holding the ledger lock.
#[derive(Debug)]
pub struct LedgerSnapshot {
    path: PathBuf,
    bytes: Vec<u8>,
    audit_log: PathBuf,
    audit: Vec<String>,
}

impl ChangeLedger {
    /// An empty ledger that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, audit_log: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            audit_log: audit_log.into(),
            records: BTreeMap::new(),
            last_processed_at: None,
            embedding: None,
            pending_audit: Vec::new(),
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load the ledger persisted at `path`.
    ///
    /// A missing file is a first run and yields an empty ledger. A file
    /// that exists but cannot be parsed is [`SyncError::CorruptLedger`].
    pub fn load(path: impl Into<PathBuf>, audit_log: impl Into<PathBuf>) -> SyncResult<Self> {
        let mut ledger = Self::new(path, audit_log);

        let bytes = match std::fs::read(&ledger.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %ledger.path.display(), "no ledger on disk, starting fresh");
                return Ok(ledger);
            }
            Err(e) => return Err(SyncError::io(&ledger.path, e)),
        };

        let file: LedgerFile =
            serde_json::from_slice(&bytes).map_err(|e| SyncError::CorruptLedger {
                path: ledger.path.clone(),
                reason: e.to_string(),
            })?;
        if file.version != LEDGER_VERSION {
            return Err(SyncError::CorruptLedger {
                path: ledger.path.clone(),
                reason: format!("unsupported ledger version {}", file.version),
            });
        }

        ledger.records = file.files;
        ledger.last_processed_at = file.last_processed_at;
        ledger.embedding = file.embedding;
        debug!(files = ledger.records.len(), "ledger loaded");
        Ok(ledger)
    }

    pub fn into_shared(self) -> SharedLedger {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// True if `path` is unknown or was recorded with a different fingerprint.
    pub fn is_changed(&self, path: &str, fingerprint: &str) -> bool {
        self.records
            .get(path)
            .map_or(true, |r| r.fingerprint != fingerprint)
    }

    /// Record `path` as processed at `fingerprint` and queue an audit line.
    pub fn mark_processed(&mut self, path: &str, fingerprint: &str) {
        let now = Utc::now();
        self.records.insert(
            path.to_string(),
            FileRecord {
                fingerprint: fingerprint.to_string(),
                last_processed_at: now,
            },
        );
        self.last_processed_at = Some(now);
        self.pending_audit
            .push(format!("{} - Processed: {}", now.to_rfc3339(), path));
    }

    /// Forget `path`. Returns whether it was known.
    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.records.remove(path).is_some();
        if removed {
            self.last_processed_at = Some(Utc::now());
        }
        removed
    }

    /// Forget every record, e.g. after the embedding model changed and
    /// every file has to be indexed again.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn embedding_model(&self) -> Option<&EmbeddingModel> {
        self.embedding.as_ref()
    }

    pub fn set_embedding_model(&mut self, model: EmbeddingModel) {
        self.embedding = Some(model);
    }

    /// Serialize the current state and take the queued audit lines.
    pub fn snapshot(&mut self) -> SyncResult<LedgerSnapshot> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            last_processed_at: self.last_processed_at,
            embedding: self.embedding.clone(),
            files: self.records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| SyncError::LedgerWrite {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        Ok(LedgerSnapshot {
            path: self.path.clone(),
            bytes,
            audit_log: self.audit_log.clone(),
            audit: std::mem::take(&mut self.pending_audit),
        })
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Known paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    pub fn records(&self) -> &BTreeMap<String, FileRecord> {
        &self.records
    }

    pub fn last_processed_at(&self) -> Option<DateTime<Utc>> {
        self.last_processed_at
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerSnapshot {
    /// Write `signatures.json.tmp`, rename it over the ledger, then append
    /// the audit lines. Blocking.
    pub fn write(self) -> SyncResult<()> {
        let result = self.write_ledger();
        self.append_audit();
        result
    }

    fn write_ledger(&self) -> SyncResult<()> {
        let write_err = |e: std::io::Error| SyncError::LedgerWrite {
            path: self.path.clone(),
            source: e,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut out = std::fs::File::create(&tmp).map_err(write_err)?;
            out.write_all(&self.bytes).map_err(write_err)?;
            out.sync_all().map_err(write_err)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        debug!(path = %self.path.display(), bytes = self.bytes.len(), "ledger saved");
        Ok(())
    }

    fn append_audit(&self) {
        if self.audit.is_empty() {
            return;
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log)
            .and_then(|mut f| {
                for line in &self.audit {
                    writeln!(f, "{}", line)?;
                }
                Ok(())
            });
        if let Err(e) = result {
            warn!(log = %self.audit_log.display(), error = %e, "could not append to processing log");
        }
    }
}

/// Persist the shared ledger.
///
/// The ledger lock is held only while serializing; the write happens on
/// the blocking pool. Concurrent calls are written in the order their
/// snapshots were taken.
pub async fn persist(ledger: &SharedLedger) -> SyncResult<()> {
    let gate = Arc::clone(&ledger.lock().await.write_gate);
    let _writing = gate.lock_owned().await;
    let snapshot = ledger.lock().await.snapshot()?;
    tokio::task::spawn_blocking(move || snapshot.write()).await?
}
