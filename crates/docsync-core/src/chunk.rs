//! Recursive overlapping text splitter.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters, with roughly `chunk_overlap` characters shared between
//! consecutive chunks.
//!
//! # Algorithm
//!
//! 1. Pick the first separator in the cascade (paragraph break, line break,
//!    sentence break, whitespace, raw character) that occurs in the text.
//! 2. Cut the text at every occurrence, keeping the separator attached to
//!    the start of the following piece.
//! 3. Pieces shorter than `chunk_size` are greedily merged into chunks.
//!    When a chunk is emitted, pieces are dropped from its front until at
//!    most `chunk_overlap` characters remain; those seed the next chunk.
//! 4. Pieces that are still too long are split again with the remaining,
//!    finer separators. The empty separator cuts between characters, so
//!    the recursion always terminates.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is
//! never cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use docsync_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(1024, 128);
//! let pieces = splitter.split_text("Hello world.\n\nSecond paragraph.");
//! assert_eq!(pieces, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::{chunk_id, Chunk, ChunkMetadata};

/// Default separator cascade, coarsest first.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Default target chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 128;

/// Deterministic recursive splitter. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextSplitter {
    /// Create a splitter with the default separator cascade.
    ///
    /// `chunk_size` is raised to at least 1 and `chunk_overlap` is capped
    /// below `chunk_size`; configuration loading rejects such values
    /// earlier with a proper error.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty pieces.
    ///
    /// Whitespace-only input yields an empty vector.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split `text` and wrap each piece in a [`Chunk`] carrying position
    /// metadata for `source`.
    ///
    /// All chunks of one call share `produced_at`. Indices are contiguous
    /// from 0 and `total_chunks` equals the returned length.
    pub fn split_document(
        &self,
        source: &str,
        text: &str,
        produced_at: DateTime<Utc>,
    ) -> Vec<Chunk> {
        let pieces = self.split_text(text);
        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| make_chunk(source, index, total, content, produced_at))
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut finer: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge_pieces(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(&pending));
        }

        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&window, &mut merged);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        push_joined(&window, &mut merged);
        merged
    }
}

/// Cut `text` at every occurrence of `separator`, keeping the separator at
/// the start of the following piece. The empty separator yields one piece
/// per character.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn push_joined(window: &VecDeque<&str>, out: &mut Vec<String>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Create a single [`Chunk`] with its deterministic id and SHA-256 content hash.
fn make_chunk(
    source: &str,
    index: usize,
    total: usize,
    content: String,
    produced_at: DateTime<Utc>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source, index),
        content,
        hash,
        metadata: ChunkMetadata {
            source: source.to_string(),
            chunk_index: index,
            total_chunks: total,
            produced_at,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let splitter = TextSplitter::default();
        let pieces = splitter.split_text("  Hello, world!  ");
        assert_eq!(pieces, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        let splitter = TextSplitter::default();
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text(" \n\n \t ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let splitter = TextSplitter::new(12, 0);
        let pieces = splitter.split_text("para one.\n\npara two.");
        assert_eq!(pieces, vec!["para one.".to_string(), "para two.".to_string()]);
    }

    #[test]
    fn test_chunks_respect_size_and_overlap() {
        let text = "word ".repeat(600);
        let splitter = TextSplitter::new(100, 20);
        let pieces = splitter.split_text(&text);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 100, "chunk too long: {}", p.len());
        }
        for pair in pieces.windows(2) {
            let head: String = pair[1].chars().take(10).collect();
            assert!(
                pair[0].contains(&head),
                "expected overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn test_hard_character_split_without_separators() {
        let text = "x".repeat(2500);
        let splitter = TextSplitter::new(1024, 128);
        let pieces = splitter.split_text(&text);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].len(), 1024);
        assert_eq!(pieces[1].len(), 1024);
        assert_eq!(pieces[2].len(), 2500 - 2 * (1024 - 128));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let splitter = TextSplitter::new(8, 2);
        let pieces = splitter.split_text(text);
        assert!(!pieces.is_empty());
        for p in &pieces {
            assert!(p.chars().count() <= 8);
        }
    }

    #[test]
    fn test_split_document_metadata() {
        let now = Utc::now();
        let splitter = TextSplitter::new(12, 0);
        let chunks = splitter.split_document("/docs/a.md", "para one.\n\npara two.", now);
        assert_eq!(chunks.len(), 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_index, i);
            assert_eq!(c.metadata.total_chunks, 2);
            assert_eq!(c.metadata.source, "/docs/a.md");
            assert_eq!(c.metadata.produced_at, now);
            assert_eq!(c.id, chunk_id("/docs/a.md", i));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha. Beta gamma.\n\nDelta epsilon. Zeta.\nEta theta iota.";
        let splitter = TextSplitter::new(16, 4);
        let now = Utc::now();
        let c1 = splitter.split_document("/d.txt", text, now);
        let c2 = splitter.split_document("/d.txt", text, now);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_overlap_capped_below_size() {
        let splitter = TextSplitter::new(10, 50);
        assert_eq!(splitter.chunk_overlap(), 9);
    }
}
