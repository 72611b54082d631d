//! Sliding-window text chunker.
//!
//! Windows are `size` characters long. Each cut is pulled back to the
//! strongest nearby boundary (paragraph, line, sentence, clause, word) as
//! long as it stays within half a window of the hard limit, and the next
//! window starts `overlap` characters before the adjusted cut.

use crate::error::{Error, Result};
use crate::vector_entry::Chunk;

/// Boundaries in priority order. The cut lands right after the separator.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size <= overlap {
            return Err(Error::InvalidChunking { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splits `text` into trimmed, non-empty chunks. Blank input yields none.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let naive_end = (start + self.size).min(len);
            let end = if naive_end == len {
                len
            } else {
                self.find_cut(&chars, start, naive_end)
            };

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= len || chars[end..].iter().all(|c| c.is_whitespace()) {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }

    /// Chunks one document and tags every piece with its `source` and `type`.
    pub fn chunk_document(&self, text: &str, source: &str, doc_type: &str) -> Vec<Chunk> {
        self.chunk(text)
            .into_iter()
            .map(|piece| Chunk::new(piece, source, doc_type))
            .collect()
    }

    fn find_cut(&self, chars: &[char], start: usize, naive_end: usize) -> usize {
        let floor = naive_end.saturating_sub(self.size / 2).max(start + 1);

        for separator in SEPARATORS {
            let sep: Vec<char> = separator.chars().collect();
            let found = (floor..=naive_end).rev().find(|&cut| {
                cut >= start + sep.len() && chars[cut - sep.len()..cut] == sep[..]
            });
            if let Some(cut) = found {
                return cut;
            }
        }

        naive_end
    }
}
