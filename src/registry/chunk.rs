//! Appended chunk handed to released readers
//!
//! When an append releases waiting readers, each of them receives the same
//! chunk: the offset it was written at plus the bytes themselves.

use bytes::Bytes;

/// Bytes written by a single append
///
/// Cheap to clone due to `Bytes` reference counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedChunk {
    /// Offset of the first byte of this chunk within the room
    pub start: usize,
    /// Chunk data (zero-copy via reference counting)
    pub data: Bytes,
}

impl AppendedChunk {
    /// Create a chunk from bytes written at `start`
    pub fn new(start: usize, data: Bytes) -> Self {
        Self { start, data }
    }

    /// Room length after this chunk was appended
    pub fn end(&self) -> usize {
        self.start + self.data.len()
    }

    /// Slice of this chunk visible to a reader tailing from `offset`
    ///
    /// Returns `None` when the chunk ends at or before `offset`, meaning the
    /// reader must keep waiting. `max_len` of `None` is unbounded.
    pub fn slice_from(&self, offset: usize, max_len: Option<usize>) -> Option<Bytes> {
        if offset >= self.end() || offset < self.start {
            return None;
        }

        let begin = offset - self.start;
        let end = match max_len {
            Some(max) => begin.saturating_add(max).min(self.data.len()),
            None => self.data.len(),
        };
        Some(self.data.slice(begin..end))
    }
}
