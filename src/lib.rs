//! # docsync
//!
//! Keeps a vector index in step with a folder of documents, across
//! restarts and while the folder is being edited.
//!
//! A durable ledger maps every processed file to a content fingerprint.
//! On startup the ledger is diffed against the folder: files that
//! disappeared are removed from the index, new and changed files are
//! extracted, chunked, embedded and upserted. After that a filesystem
//! watcher feeds every further change through the same pipeline, and a
//! small HTTP API serves similarity search.
//!
//! ## Architecture
//!
//! ```text
//!  documents/ ──▶ Reconciler ──▶ IngestionPipeline ──▶ VectorIndex
//!       │             ▲                 │                (sqlite/memory)
//!       │             │                 ▼
//!       └──▶ WatchDispatcher      ChangeLedger ──▶ signatures.json
//!                                                        │
//!                     SyncEngine ◀── CLI / HTTP ─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsync init                   # create data directories and index
//! docsync sync                   # one reconciliation pass
//! docsync search "retention policy"
//! docsync serve                  # startup pass, watcher, HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and kinds |
//! | [`fingerprint`] | Content fingerprints |
//! | [`ledger`] | Durable path → fingerprint ledger |
//! | [`walker`] | Directory listing and path filtering |
//! | [`extract`] | Text extraction per file format |
//! | [`locks`] | Per-path mutation locks |
//! | [`pipeline`] | Extract, chunk, upsert, record |
//! | [`reconcile`] | Ledger versus filesystem diff |
//! | [`watcher`] | Live filesystem monitoring |
//! | [`engine`] | Boundary operations and startup ordering |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_index`] | SQLite vector index |
//! | [`server`] | HTTP API |
//! | [`progress`] | Sync progress reporting |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod ledger;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod server;
pub mod sqlite_index;
pub mod walker;
pub mod watcher;

pub use docsync_core::{chunk, index, models};
