//! Directory listing and path identity.
//!
//! [`FileFilter`] decides which paths under the documents directory take
//! part in syncing, and turns any path into the canonical absolute string
//! used as the ledger and index key. The reconciler, the pipeline and the
//! watcher all go through the same filter so they agree on what exists.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct FileFilter {
    root: PathBuf,
    extensions: HashSet<String>,
    exclude: GlobSet,
}

impl FileFilter {
    /// Build a filter for `root`, which must exist.
    ///
    /// `extensions` are matched case-insensitively, with or without a
    /// leading dot. `exclude_globs` are matched against the path relative
    /// to `root`.
    pub fn new(root: &Path, extensions: &[String], exclude_globs: &[String]) -> SyncResult<Self> {
        let root = root.canonicalize().map_err(|e| SyncError::io(root, e))?;
        let extensions = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let exclude = build_globset(exclude_globs)?;
        Ok(Self {
            root,
            extensions,
            exclude,
        })
    }

    /// Canonical documents directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_supported_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }

    /// Whether `path` (absolute, or relative to the root) takes part in
    /// syncing: inside the root, no hidden component, a supported
    /// extension, and not excluded.
    ///
    /// Only the path is inspected, so this also works for files that were
    /// just deleted.
    pub fn accepts(&self, path: &Path) -> bool {
        let absolute = self.absolute(path);
        let Ok(relative) = absolute.strip_prefix(&self.root) else {
            return false;
        };
        let hidden = relative.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if hidden || relative.as_os_str().is_empty() {
            return false;
        }
        if self.exclude.is_match(relative) {
            return false;
        }
        self.has_supported_extension(&absolute)
    }

    /// Canonical absolute string for `path`.
    ///
    /// Falls back to canonicalizing the parent directory when the file
    /// itself no longer exists, and to the lexical path when neither does.
    pub fn normalize(&self, path: &Path) -> String {
        let absolute = self.absolute(path);
        let resolved = absolute.canonicalize().ok().or_else(|| {
            let parent = absolute.parent()?.canonicalize().ok()?;
            Some(parent.join(absolute.file_name()?))
        });
        resolved
            .unwrap_or(absolute)
            .to_string_lossy()
            .into_owned()
    }

    /// Walk the root and return the normalized path of every accepted
    /// regular file.
    ///
    /// Entries that vanish or cannot be read during the walk are logged
    /// and skipped. Only an unreadable root fails the scan.
    pub fn scan(&self) -> SyncResult<BTreeSet<String>> {
        std::fs::read_dir(&self.root).map_err(|e| SyncError::io(&self.root, e))?;

        let mut files = BTreeSet::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }
            files.insert(entry.path().to_string_lossy().into_owned());
        }

        Ok(files)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn build_globset(patterns: &[String]) -> SyncResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SyncError::Config(format!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("invalid exclude globs: {}", e)))
}
