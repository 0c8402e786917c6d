//! In-memory backer
//!
//! Nothing survives the process. Every read and write is recorded so tests
//! can check when the registry actually touched persistence.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backer, Backing};

/// One recorded access to a [`MemoryBacker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackerEvent {
    /// A room was read; `None` if it was never written
    Read { name: String, data: Option<Vec<u8>> },
    /// A room was written
    Write { name: String, data: Vec<u8> },
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Vec<u8>>,
    events: Vec<BackerEvent>,
}

/// Backer keeping rooms in a map
#[derive(Default)]
pub struct MemoryBacker {
    inner: Mutex<Inner>,
}

impl MemoryBacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backer pre-populated with `rooms`, without recording events
    pub fn with_rooms<I, K, V>(rooms: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let rooms = rooms
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                rooms,
                events: Vec::new(),
            }),
        }
    }

    /// Stored bytes of `name`
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().rooms.get(name).cloned()
    }

    /// Number of stored rooms
    pub fn len(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every access so far, oldest first
    pub fn events(&self) -> Vec<BackerEvent> {
        self.inner.lock().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }
}

#[async_trait]
impl Backer for MemoryBacker {
    async fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.rooms.insert(name.to_string(), data.to_vec());
        inner.events.push(BackerEvent::Write {
            name: name.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn read(&self, name: &str, capacity: usize) -> io::Result<Backing> {
        let mut inner = self.inner.lock();
        let stored = inner.rooms.get(name).cloned();
        inner.events.push(BackerEvent::Read {
            name: name.to_string(),
            data: stored.clone(),
        });

        Ok(match stored {
            Some(bytes) => {
                let mut data = Vec::with_capacity(capacity.max(bytes.len()));
                data.extend_from_slice(&bytes);
                Backing {
                    data,
                    existed: true,
                }
            }
            None => Backing::fresh(capacity),
        })
    }

    async fn for_each_backing(
        &self,
        visit: &mut (dyn for<'n, 's> FnMut(&'n str, &'s dyn Fn() -> io::Result<usize>) -> bool + Send),
    ) -> io::Result<()> {
        let sizes: Vec<(String, usize)> = self
            .inner
            .lock()
            .rooms
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect();

        for (name, size) in sizes {
            if !visit(&name, &|| Ok(size)) {
                break;
            }
        }
        Ok(())
    }
}
