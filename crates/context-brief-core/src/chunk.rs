//! Overlapping sliding-window text chunker.
//!
//! Splits document text into segments of at most `chunk_size` characters,
//! with consecutive segments sharing exactly `overlap` characters.
//!
//! # Algorithm
//!
//! 1. If the text fits in one window, return it unchanged.
//! 2. Take a window of `chunk_size` characters starting at `start`.
//! 3. If the window ends before the text does, look backward for the last
//!    sentence terminator, newline, or space. Cut just after it when that
//!    point lies past the window midpoint, otherwise cut at `chunk_size`.
//! 4. Advance `start` to `start + len(chunk) − overlap`.
//! 5. The window that reaches the end of the text is the last chunk.
//!
//! Lengths are counted in characters, so multi-byte text never splits
//! inside a code point. `overlap` is clamped below `chunk_size`, and a
//! snapped cut that would not outrun the overlap falls back to the hard
//! cut, so `start` strictly increases and the loop always terminates.
//!
//! # Example
//!
//! ```rust
//! use context_brief_core::chunk::split;
//!
//! let chunks = split("Short text.", 1000, 200);
//! assert_eq!(chunks, vec!["Short text.".to_string()]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Characters a window may be cut after.
const BREAK_CHARS: [char; 5] = ['.', '!', '?', '\n', ' '];

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Finite output for every input, including `chunk_size == 0`
///   (treated as 1) and `overlap >= chunk_size` (clamped).
/// - Every chunk except the last is longer than the effective overlap.
/// - Dropping the first `overlap` characters of every chunk after the
///   first and concatenating reproduces `text` exactly.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = effective_overlap(chunk_size, overlap);

    // Byte offset of every char, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    if total <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let tentative_end = start + chunk_size;
        if tentative_end >= total {
            chunks.push(text[bounds[start]..].to_string());
            break;
        }

        let window = &text[bounds[start]..bounds[tentative_end]];
        let end = start + snap_length(window, chunk_size, overlap);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        start = end - overlap;
    }

    chunks
}

/// The overlap actually applied for a given window size.
pub fn effective_overlap(chunk_size: usize, overlap: usize) -> usize {
    overlap.min(chunk_size.max(1) - 1)
}

/// Length in chars of the chunk cut from a full `window`.
fn snap_length(window: &str, chunk_size: usize, overlap: usize) -> usize {
    let midpoint = chunk_size / 2;
    let cut = window
        .chars()
        .enumerate()
        .filter(|(_, c)| BREAK_CHARS.contains(c))
        .last()
        .map(|(i, _)| i + 1);

    match cut {
        Some(len) if len > midpoint && len > overlap => len,
        _ => chunk_size,
    }
}

/// Split a document into [`Chunk`]s with contiguous segment indices.
///
/// Each chunk carries a SHA-256 hash of its text so re-ingestion can tell
/// unchanged segments apart.
pub fn chunk_document(doc_id: u64, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    split(text, chunk_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(doc_id, i as u32, piece))
        .collect()
}

fn make_chunk(doc_id: u64, segment_index: u32, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        doc_id,
        segment_index,
        text,
        hash,
    }
}
