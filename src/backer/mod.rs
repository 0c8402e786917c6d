//! Persistence for room contents
//!
//! Rooms live in memory for speed and simplicity; a [`Backer`] is where their
//! bytes go when a room is dumped and where they come back from when it is
//! used again.
//!
//! - [`FileBacker`]: one file per room under a folder
//! - [`MemoryBacker`]: in-process map that records every access

pub mod file;
pub mod memory;

use std::io;

use async_trait::async_trait;

pub use file::FileBacker;
pub use memory::{BackerEvent, MemoryBacker};

/// Bytes read back for a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backing {
    /// Persisted bytes, allocated with at least the requested capacity
    pub data: Vec<u8>,
    /// Whether the room was persisted before
    pub existed: bool,
}

impl Backing {
    /// Empty backing for a room that was never persisted
    pub fn fresh(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            existed: false,
        }
    }
}

/// Durable key to bytes store for room contents
///
/// Writes to different names may happen concurrently; implementations must
/// keep operations on a single name linearizable.
#[async_trait]
pub trait Backer: Send + Sync {
    /// Replace the stored bytes of `name`
    async fn write(&self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Read the stored bytes of `name`
    ///
    /// Unknown names are not an error: they yield an empty buffer with
    /// `capacity` reserved and `existed == false`.
    async fn read(&self, name: &str, capacity: usize) -> io::Result<Backing>;

    /// Call `visit` for every persisted room until it returns `false`
    ///
    /// The second argument yields the stored size. Implementations must not
    /// block the runtime inside it.
    async fn for_each_backing(
        &self,
        visit: &mut (dyn for<'n, 's> FnMut(&'n str, &'s dyn Fn() -> io::Result<usize>) -> bool + Send),
    ) -> io::Result<()>;
}

/// Whether `name` is persisted in `backer`
///
/// Walks the enumeration, so it is linear in the number of rooms.
pub async fn exists(backer: &dyn Backer, name: &str) -> io::Result<bool> {
    let mut found = false;
    backer
        .for_each_backing(&mut |key, _| {
            found = key == name;
            !found
        })
        .await?;
    Ok(found)
}
