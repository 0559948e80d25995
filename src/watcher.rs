//! Live filesystem monitoring.
//!
//! [`WatchDispatcher`] turns `notify` events under the documents directory
//! into pipeline calls. It runs one worker task with an observable state
//! machine:
//!
//! ```text
//! Idle ──event──▶ Processing ──done──▶ CooldownWait ──timer──▶ Idle
//!                     ▲                      │
//!                     └──── pending events ──┘
//! ```
//!
//! The `notify` callback feeds a bounded channel with `blocking_send`, so
//! a worker that falls behind slows the OS watcher down instead of growing
//! memory. With [`BusyPolicy::Queue`] events that arrive while the worker
//! is busy are coalesced per path (latest kind wins) and handled after the
//! cooldown. With [`BusyPolicy::Drop`] they are discarded with a warning.
//!
//! Only paths the [`FileFilter`] accepts are dispatched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::error::{SyncError, SyncResult};
use crate::fingerprint::fingerprint;
use crate::ledger::persist;
use crate::pipeline::IngestionPipeline;
use crate::walker::FileFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    Idle,
    Processing,
    CooldownWait,
}

/// What to do with events that arrive while the worker is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    Queue,
    Drop,
}

impl std::str::FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(BusyPolicy::Queue),
            "drop" => Ok(BusyPolicy::Drop),
            other => Err(format!(
                "unknown on_busy policy '{}': expected queue or drop",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Remove,
}

/// Map a raw `notify` event to the accepted paths it touches.
///
/// Access events and anything `notify` cannot classify are ignored.
pub fn classify(event: &Event, filter: &FileFilter) -> Vec<(String, ChangeKind)> {
    let kinds: Vec<ChangeKind> = match event.kind {
        EventKind::Create(_) => vec![ChangeKind::Upsert; event.paths.len()],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![ChangeKind::Remove; event.paths.len()]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths[0] is the old name, paths[1] the new one.
            let mut kinds = vec![ChangeKind::Upsert; event.paths.len()];
            if let Some(first) = kinds.first_mut() {
                *first = ChangeKind::Remove;
            }
            kinds
        }
        EventKind::Modify(_) => vec![ChangeKind::Upsert; event.paths.len()],
        EventKind::Remove(_) => vec![ChangeKind::Remove; event.paths.len()],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .zip(kinds)
        .filter(|(path, _)| filter.accepts(path))
        .map(|(path, kind)| (filter.normalize(path), kind))
        .collect()
}

/// Handle to a running watcher. Dropping it stops the OS watcher and the
/// worker.
pub struct WatchDispatcher {
    state: watch::Receiver<DispatcherState>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    _watcher: RecommendedWatcher,
}

impl WatchDispatcher {
    /// Start watching `filter.root()` recursively.
    pub fn start(
        pipeline: Arc<IngestionPipeline>,
        filter: Arc<FileFilter>,
        config: &WatcherConfig,
    ) -> SyncResult<Self> {
        let policy: BusyPolicy = config.on_busy.parse().map_err(SyncError::Config)?;
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(filter.root(), RecursiveMode::Recursive)?;

        let (state_tx, state_rx) = watch::channel(DispatcherState::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            pipeline,
            filter: Arc::clone(&filter),
            cooldown: config.cooldown(),
            policy,
            state: state_tx,
        };
        let handle = tokio::spawn(worker.run(event_rx, shutdown_rx));

        info!(
            root = %filter.root().display(),
            cooldown_ms = config.cooldown_ms,
            ?policy,
            "watching documents directory"
        );

        Ok(Self {
            state: state_rx,
            shutdown: Some(shutdown_tx),
            worker: Some(handle),
            _watcher: watcher,
        })
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.clone()
    }

    /// Stop the worker and wait for the event in flight, if any, to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "watcher worker panicked");
            }
        }
    }
}

impl Drop for WatchDispatcher {
    fn drop(&mut self) {
        // Dropping the sender resolves the worker's shutdown receiver.
        self.shutdown.take();
    }
}

struct Worker {
    pipeline: Arc<IngestionPipeline>,
    filter: Arc<FileFilter>,
    cooldown: Duration,
    policy: BusyPolicy,
    state: watch::Sender<DispatcherState>,
}

impl Worker {
    async fn run(
        self,
        mut events: mpsc::Receiver<notify::Result<Event>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut pending: BTreeMap<String, ChangeKind> = BTreeMap::new();

        'idle: loop {
            self.set_state(DispatcherState::Idle);
            let first = tokio::select! {
                _ = &mut shutdown => break 'idle,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break 'idle,
                },
            };
            self.absorb(first, &mut pending);

            while !pending.is_empty() {
                self.set_state(DispatcherState::Processing);
                let batch = std::mem::take(&mut pending);
                self.handle(batch).await;

                self.set_state(DispatcherState::CooldownWait);
                let deadline = Instant::now() + self.cooldown;
                loop {
                    tokio::select! {
                        _ = &mut shutdown => break 'idle,
                        _ = time::sleep_until(deadline) => break,
                        next = events.recv() => match next {
                            Some(event) => match self.policy {
                                BusyPolicy::Queue => self.absorb(event, &mut pending),
                                BusyPolicy::Drop => self.discard(event),
                            },
                            None => break 'idle,
                        },
                    }
                }
            }
        }

        debug!("watcher worker stopped");
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.send_replace(state);
    }

    fn absorb(&self, event: notify::Result<Event>, pending: &mut BTreeMap<String, ChangeKind>) {
        match event {
            Ok(event) => {
                for (path, kind) in classify(&event, &self.filter) {
                    pending.insert(path, kind);
                }
            }
            Err(e) => warn!(error = %e, "file watcher reported an error"),
        }
    }

    fn discard(&self, event: notify::Result<Event>) {
        if let Ok(event) = event {
            for (path, kind) in classify(&event, &self.filter) {
                warn!(path = %path, ?kind, "watcher busy, event dropped");
            }
        }
    }

    /// Apply one coalesced set of changes. Failures are logged, never
    /// returned, so the loop keeps running.
    async fn handle(&self, batch: BTreeMap<String, ChangeKind>) {
        let mut upserts = Vec::new();
        let mut removals = Vec::new();
        for (path, kind) in batch {
            // The file's presence now decides; the event kind may be stale.
            if Path::new(&path).is_file() {
                upserts.push(path);
            } else {
                debug!(path = %path, ?kind, "file gone, removing");
                removals.push(path);
            }
        }

        if let Err(e) = self.apply_upserts(upserts).await {
            error!(error = %e, kind = ?e.kind(), "watcher failed to ingest changes");
        }
        if let Err(e) = self.apply_removals(removals).await {
            error!(error = %e, kind = ?e.kind(), "watcher failed to remove documents");
        }
    }

    async fn apply_upserts(&self, paths: Vec<String>) -> SyncResult<()> {
        let mut changed = Vec::with_capacity(paths.len());
        for path in paths {
            let file = PathBuf::from(&path);
            let current = match tokio::task::spawn_blocking(move || fingerprint(&file)).await? {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(path = %path, error = %e, "cannot fingerprint, skipping");
                    continue;
                }
            };
            if self.pipeline.ledger().lock().await.is_changed(&path, &current) {
                changed.push(path);
            } else {
                debug!(path = %path, "unchanged, skipping");
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        let report = self.pipeline.process_batch(&changed).await?;
        info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "watcher ingested changes"
        );
        Ok(())
    }

    async fn apply_removals(&self, paths: Vec<String>) -> SyncResult<()> {
        let mut removed = 0usize;
        for path in paths {
            match self.pipeline.remove_file(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %path, error = %e, "failed to remove document"),
            }
        }
        if removed > 0 {
            persist(self.pipeline.ledger()).await?;
            info!(removed, "watcher removed deleted documents");
        }
        Ok(())
    }
}
