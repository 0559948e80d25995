//! # docsync core
//!
//! Runtime-free building blocks for docsync: chunk models, the recursive
//! overlapping text splitter, the embedder trait and the vector index
//! abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! platform-specific dependencies. Everything that touches the disk,
//! the network or a database lives in the `docsync` application crate.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
