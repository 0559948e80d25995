//! Content fingerprints.
//!
//! A fingerprint is a cheap proxy for a file's identity, formatted as
//! `"{mtime}_{size}_{hexhash}"` where `mtime` is nanoseconds since the
//! Unix epoch and `hexhash` is a SHA-256 digest:
//!
//! - files below [`FULL_HASH_LIMIT`] hash their whole content;
//! - larger files hash only the first and last [`EDGE_BYTES`].
//!
//! The second branch bounds the cost for big files and misses edits that
//! touch only the middle of a large file while leaving size and mtime
//! unchanged. Since mtime and size are part of every fingerprint, a plain
//! `touch` still counts as a change.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};

/// Files strictly smaller than this are hashed in full.
pub const FULL_HASH_LIMIT: u64 = 1024 * 1024;

/// Bytes hashed from each end of a large file.
pub const EDGE_BYTES: u64 = 64 * 1024;

/// Compute the fingerprint of the file at `path`.
///
/// Fails with [`SyncError::Io`] if the file cannot be read, including when
/// it disappears between listing and hashing.
pub fn fingerprint(path: &Path) -> SyncResult<String> {
    let io_err = |e: std::io::Error| SyncError::io(path, e);

    let mut file = File::open(path).map_err(io_err)?;
    let metadata = file.metadata().map_err(io_err)?;
    let size = metadata.len();
    let mtime = metadata
        .modified()
        .map_err(io_err)?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = Sha256::new();
    if size < FULL_HASH_LIMIT {
        let mut buf = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buf).map_err(io_err)?;
        hasher.update(&buf);
    } else {
        let mut head = vec![0u8; EDGE_BYTES as usize];
        file.read_exact(&mut head).map_err(io_err)?;
        hasher.update(&head);

        let mut tail = vec![0u8; EDGE_BYTES as usize];
        file.seek(SeekFrom::End(-(EDGE_BYTES as i64)))
            .map_err(io_err)?;
        file.read_exact(&mut tail).map_err(io_err)?;
        hasher.update(&tail);
    }

    Ok(format!(
        "{}_{}_{}",
        mtime,
        size,
        hex::encode(hasher.finalize())
    ))
}
