//! Room entry and state types
//!
//! This module defines the per-room state stored in the registry: the fixed
//! capacity buffer, the byte length and the readers waiting for the next
//! append.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio::time::Instant;

use super::chunk::AppendedChunk;
use super::error::StreamError;

/// Entry for a single room in the registry
pub struct StreamEntry {
    /// Fixed capacity every loaded buffer is allocated with
    capacity: usize,

    state: Mutex<EntryState>,
}

/// Mutable room state, guarded by the entry lock
pub(crate) struct EntryState {
    /// Room bytes; `None` while dumped
    data: Option<Vec<u8>>,

    /// Bytes ever appended, kept while the buffer is dumped
    length: usize,

    /// When the room was last appended to
    last_write: Option<Instant>,

    /// Listener count seen by the last append
    last_write_listeners: usize,

    /// Buffer holds bytes not yet flushed
    dirty: bool,

    /// Pending completions of blocked readers
    waiters: Vec<oneshot::Sender<AppendedChunk>>,
}

impl StreamEntry {
    /// Create a dumped entry for a room persisted with `length` bytes
    pub(super) fn unloaded(capacity: usize, length: usize) -> Self {
        Self::with_data(capacity, None, length)
    }

    /// Create a loaded, empty entry for a brand-new room
    pub(super) fn empty(capacity: usize) -> Self {
        Self::with_data(capacity, Some(Vec::with_capacity(capacity)), 0)
    }

    fn with_data(capacity: usize, data: Option<Vec<u8>>, length: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(EntryState {
                data,
                length,
                last_write: None,
                last_write_listeners: 0,
                dirty: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Fixed byte capacity of this room when loaded
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the room state
    pub(super) async fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().await
    }

    /// Snapshot of this room
    pub async fn info(&self) -> StreamInfo {
        self.lock().await.info(self.capacity)
    }
}

impl EntryState {
    /// Whether the room bytes are resident
    pub(super) fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub(super) fn length(&self) -> usize {
        self.length
    }

    /// Number of readers currently blocked on this room
    ///
    /// Readers that gave up dropped their receiver, which closes the sender.
    pub(super) fn listener_count(&self) -> usize {
        self.waiters.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Time since the last append; never-written rooms are idle forever
    pub(super) fn idle_for(&self, now: Instant) -> Duration {
        match self.last_write {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::MAX,
        }
    }

    /// Install bytes read from the backer
    ///
    /// The buffer is given the room's full capacity up front so appends never
    /// reallocate.
    pub(super) fn load(&mut self, mut data: Vec<u8>, capacity: usize) -> Result<(), StreamError> {
        if data.len() > capacity {
            return Err(StreamError::OverCapacity {
                capacity,
                length: 0,
                requested: data.len(),
            });
        }
        data.reserve_exact(capacity - data.len());
        self.length = data.len();
        self.data = Some(data);
        Ok(())
    }

    /// Append bytes and release every reader waiting right now
    ///
    /// All-or-nothing: on error the buffer is left untouched. Readers that
    /// register after this call wait for the next append.
    pub(super) fn append(&mut self, bytes: &[u8], capacity: usize) -> Result<(), StreamError> {
        let length = self.length;
        let Some(data) = self.data.as_mut() else {
            // A dumped room has no capacity until it is loaded again
            return Err(StreamError::OverCapacity {
                capacity: 0,
                length,
                requested: bytes.len(),
            });
        };

        if length + bytes.len() > capacity {
            return Err(StreamError::OverCapacity {
                capacity,
                length,
                requested: bytes.len(),
            });
        }

        data.extend_from_slice(bytes);
        self.length = data.len();
        self.last_write = Some(Instant::now());
        self.last_write_listeners = self.listener_count();
        self.dirty = true;

        let chunk = AppendedChunk::new(length, Bytes::copy_from_slice(bytes));
        for tx in self.waiters.drain(..) {
            let _ = tx.send(chunk.clone());
        }

        Ok(())
    }

    /// Bytes in `[offset, min(offset + max_len, length))`
    ///
    /// Empty when the room is dumped or `offset` is at or past the end.
    pub(super) fn slice(&self, offset: usize, max_len: Option<usize>) -> Bytes {
        let Some(data) = self.data.as_ref() else {
            return Bytes::new();
        };
        if offset >= data.len() {
            return Bytes::new();
        }

        let end = match max_len {
            Some(max) => offset.saturating_add(max).min(data.len()),
            None => data.len(),
        };
        Bytes::copy_from_slice(&data[offset..end])
    }

    /// Register as a listener for the next append
    pub(super) fn listen(&mut self) -> oneshot::Receiver<AppendedChunk> {
        self.prune_listeners();
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Forget readers that stopped waiting
    pub(super) fn prune_listeners(&mut self) {
        self.waiters.retain(|tx| !tx.is_closed());
    }

    /// Flush the buffer through `flush` and drop it on success
    ///
    /// Returns `Ok(false)` without calling `flush` if nothing is loaded. On
    /// error the room stays loaded.
    pub(super) async fn dump<F, Fut>(&mut self, flush: F) -> std::io::Result<bool>
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let Some(data) = self.data.as_ref() else {
            return Ok(false);
        };

        flush(Bytes::copy_from_slice(data)).await?;

        self.data = None;
        self.dirty = false;
        Ok(true)
    }

    pub(super) fn info(&self, capacity: usize) -> StreamInfo {
        StreamInfo {
            length: self.length,
            capacity: if self.is_loaded() { capacity } else { 0 },
            listener_count: self.listener_count(),
            last_write: self.last_write,
            last_write_listener_count: self.last_write_listeners,
            dirty: self.dirty,
        }
    }
}

/// Snapshot of a room
///
/// Stale as soon as it is taken; for informational purposes only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Bytes ever appended
    pub length: usize,
    /// Buffer capacity, 0 while the room is dumped
    pub capacity: usize,
    /// Readers currently blocked waiting for data
    pub listener_count: usize,
    /// When the room was last appended to
    pub last_write: Option<Instant>,
    /// Listener count seen by the last append
    pub last_write_listener_count: usize,
    /// Buffer holds bytes not yet flushed
    pub dirty: bool,
}
