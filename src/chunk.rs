//! Overlapping sentence-aware text chunker.
//!
//! Slides a window of `chunk_size` characters over the text. When the window
//! ends before the text does, the last sentence terminator (`.`, `!`, `?`,
//! `\n`) inside the trailing `boundary_lookback` characters becomes the cut
//! point. Consecutive windows share `overlap` characters of context.
//!
//! Positions are counted in `char`s, so multi-byte text never splits inside
//! a code point.

use crate::config::ChunkingConfig;

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Split text into ordered, trimmed, non-empty chunks.
///
/// Empty (or whitespace-only) input yields no chunks; input no longer than
/// `chunk_size` yields a single chunk.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let size = config.chunk_size.max(1);
    let overlap = config.overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + size).min(len);

        if end < len {
            let window_start = end.saturating_sub(config.boundary_lookback).max(start + 1);
            if let Some(pos) = (window_start..end).rev().find(|&i| is_terminator(chars[i])) {
                end = pos + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= len {
            break;
        }
        // Always make forward progress, even when a boundary cut lands inside the overlap.
        let next = end - overlap;
        start = if next > start { next } else { end };
    }

    chunks
}
