//! Per-path mutual exclusion.
//!
//! Every mutation of a single document (ingestion, watcher delete, API
//! delete) holds that document's lock for its whole
//! extract, upsert and ledger update sequence. Different paths never
//! contend. Entries are pruned once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a path is being mutated. Dropping it releases the path.
pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no one else is mutating `path`, then take it.
    pub async fn lock(&self, path: &str) -> PathGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // Drop slots nobody references besides the map itself.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(path.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        PathGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of paths currently locked or awaited.
    pub fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_serializes() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.lock("/a.txt").await;

        let l2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = l2.lock("/a.txt").await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.lock("/a.txt").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("/b.txt")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = PathLocks::new();
        drop(locks.lock("/a.txt").await);
        drop(locks.lock("/b.txt").await);
        assert_eq!(locks.active(), 0);
    }
}
