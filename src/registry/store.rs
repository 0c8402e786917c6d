//! Room system implementation
//!
//! The central registry that owns every room, enforces the room limits and
//! moves room contents between memory and the backer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use regex::Regex;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backer::Backer;

use super::config::{StreamConstants, SystemConfig};
use super::entry::{EntryState, StreamEntry, StreamInfo};
use super::error::StreamError;

/// Result type alias for room operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Central registry for all rooms
///
/// Thread-safe via `RwLock` around the room map plus one lock per room. The
/// map lock is never held while a room lock is awaited.
pub struct StreamSystem {
    /// Map of room name to room entry; every room seen since start
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,

    /// Number of rooms with their bytes in memory
    active: AtomicUsize,

    /// Compiled, fully anchored room pattern
    room_regex: Regex,

    /// Persistence for dumped rooms
    backer: Arc<dyn Backer>,

    /// Configuration
    config: SystemConfig,
}

impl StreamSystem {
    /// Create a room system over `backer`
    ///
    /// Every room already persisted in the backer is registered (dumped, with
    /// its stored length) so it counts toward the total room limit. Fails
    /// with [`StreamError::Config`] if `config` does not validate.
    pub async fn new(config: SystemConfig, backer: Arc<dyn Backer>) -> Result<Self> {
        config.validate()?;
        let room_regex = Regex::new(&format!("^(?:{})$", config.room_regex))?;

        let capacity = config.stream_data_limit;
        let mut streams = HashMap::new();
        let mut size_error = None;
        backer
            .for_each_backing(&mut |name, size| match size() {
                Ok(length) => {
                    streams.insert(
                        name.to_string(),
                        Arc::new(StreamEntry::unloaded(capacity, length)),
                    );
                    true
                }
                Err(e) => {
                    size_error = Some(e);
                    false
                }
            })
            .await?;
        if let Some(e) = size_error {
            return Err(e.into());
        }

        tracing::info!(
            persisted_rooms = streams.len(),
            total_room_limit = config.total_room_limit,
            active_room_limit = config.active_room_limit,
            "Room system started"
        );

        Ok(Self {
            streams: RwLock::new(streams),
            active: AtomicUsize::new(0),
            room_regex,
            backer,
            config,
        })
    }

    /// Get the system configuration
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Limits exposed to clients
    pub fn constants(&self) -> StreamConstants {
        self.config.constants()
    }

    /// Number of rooms currently loaded in memory
    pub fn room_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Number of rooms known, loaded or not
    pub async fn total_room_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Append `data` to room `name`
    ///
    /// Fails without touching the room if the append would overflow its
    /// capacity. Every reader currently waiting on the room is released with
    /// exactly these bytes.
    pub async fn append_data(&self, name: &str, data: &[u8]) -> Result<()> {
        self.check_name(name)?;
        if data.len() > self.config.single_data_limit {
            return Err(StreamError::DataTooLarge {
                size: data.len(),
                limit: self.config.single_data_limit,
            });
        }

        let entry = self.get_stream(name).await?;
        let mut state = entry.lock().await;

        if self.refresh(name, &mut state).await? {
            tracing::debug!(
                room = name,
                offset = state.length(),
                size = data.len(),
                "Write refreshed backing stream"
            );
        }

        state.append(data, entry.capacity())?;

        tracing::trace!(room = name, size = data.len(), length = state.length(), "Appended");
        Ok(())
    }

    /// Read room `name` from `offset`, at most `max_len` bytes (`None` = all)
    ///
    /// Bytes already available are returned immediately. At the end of the
    /// room, a read without `cancel` returns empty right away and never
    /// registers as a listener; with `cancel` it waits for the next append
    /// that reaches past `offset`, or fails with [`StreamError::Cancelled`]
    /// once the token fires.
    pub async fn read_data(
        &self,
        name: &str,
        offset: usize,
        max_len: Option<usize>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes> {
        self.check_name(name)?;
        let entry = self.get_stream(name).await?;

        loop {
            let mut state = entry.lock().await;

            if offset < state.length() {
                if self.refresh(name, &mut state).await? {
                    tracing::debug!(room = name, offset, "Read refreshed backing stream");
                }
                return Ok(state.slice(offset, max_len));
            }

            // Waiting needs no bytes in memory, so a dumped room stays dumped
            let Some(cancel) = cancel else {
                return Ok(Bytes::new());
            };

            let mut rx = state.listen();
            tracing::trace!(room = name, offset, listeners = state.listener_count(), "Listener added");
            drop(state);

            let woke = tokio::select! {
                biased;
                chunk = &mut rx => Some(chunk),
                _ = cancel.cancelled() => None,
            };

            match woke {
                Some(Ok(chunk)) => {
                    if let Some(bytes) = chunk.slice_from(offset, max_len) {
                        return Ok(bytes);
                    }
                    // That append stopped short of `offset`; wait for the next one
                }
                Some(Err(_)) => {
                    // Completion dropped without a send; re-register
                }
                None => {
                    drop(rx);
                    entry.lock().await.prune_listeners();
                    return Err(StreamError::Cancelled);
                }
            }
        }
    }

    /// Long-poll read bounded by the configured read timeout
    ///
    /// Like a blocking [`read_data`](Self::read_data), but a timeout or
    /// `parent` being cancelled completes with empty bytes instead of an
    /// error.
    pub async fn poll_data(
        &self,
        name: &str,
        offset: usize,
        max_len: Option<usize>,
        parent: &CancellationToken,
    ) -> Result<Bytes> {
        let token = parent.child_token();
        let read = self.read_data(name, offset, max_len, Some(&token));

        match tokio::time::timeout(self.config.read_timeout, read).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(StreamError::Cancelled)) | Err(_) => Ok(Bytes::new()),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Snapshot of room `name`
    ///
    /// Creates the room if it is new, but never reloads a dumped room and
    /// never waits for data.
    pub async fn room_info(&self, name: &str) -> Result<StreamInfo> {
        self.check_name(name)?;
        let entry = self.get_stream(name).await?;
        Ok(entry.info().await)
    }

    /// Dump rooms to the backer and release their memory
    ///
    /// With `force` every loaded room is dumped; otherwise only rooms idle
    /// for longer than the configured idle time. Returns the names actually
    /// flushed. A room whose flush fails stays loaded.
    pub async fn dump_streams(&self, force: bool) -> Vec<String> {
        let entries: Vec<(String, Arc<StreamEntry>)> = self
            .streams
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();

        let idle_time = self.config.idle_room_time;
        let mut dumped = Vec::new();

        for (name, entry) in entries {
            let mut state = entry.lock().await;
            if !state.is_loaded() {
                continue;
            }
            if !force && state.idle_for(Instant::now()) <= idle_time {
                continue;
            }

            let backer = &self.backer;
            let room = name.as_str();
            let result = state
                .dump(|data| async move { backer.write(room, &data).await })
                .await;

            match result {
                Ok(true) => {
                    self.release_active();
                    tracing::info!(
                        room = %name,
                        length = state.length(),
                        force,
                        "Dumped room to persistent storage"
                    );
                    dumped.push(name);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(room = %name, error = %e, "Error saving room, keeping it loaded");
                }
            }
        }

        dumped
    }

    /// Spawn the background dump task
    ///
    /// Dumps idle rooms every dump interval. When `shutdown` is cancelled it
    /// force-dumps every room once and exits.
    pub fn spawn_dump_task(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let system = Arc::clone(self);
        let interval = system.config.effective_dump_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            tracing::info!(interval_secs = interval.as_secs_f64(), "Room dump task started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let dumped = system.dump_streams(true).await;
                        tracing::info!(rooms = dumped.len(), "Room dump task stopping, forced dump done");
                        return;
                    }
                    _ = ticker.tick() => {
                        let dumped = system.dump_streams(false).await;
                        if !dumped.is_empty() {
                            tracing::debug!(rooms = dumped.len(), "Idle rooms dumped");
                        }
                    }
                }
            }
        })
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.room_regex.is_match(name) {
            Ok(())
        } else {
            Err(StreamError::InvalidRoomName {
                name: name.to_string(),
                pattern: self.config.room_regex.clone(),
            })
        }
    }

    /// Get the entry for `name`, creating it if this is a brand-new room
    ///
    /// A new room is born loaded, so it needs both a free total slot and a
    /// free active slot. Existing rooms are returned as they are, possibly
    /// dumped.
    async fn get_stream(&self, name: &str) -> Result<Arc<StreamEntry>> {
        if let Some(entry) = self.streams.read().await.get(name) {
            return Ok(Arc::clone(entry));
        }

        let mut streams = self.streams.write().await;

        // Another task may have created it meanwhile
        if let Some(entry) = streams.get(name) {
            return Ok(Arc::clone(entry));
        }

        if streams.len() >= self.config.total_room_limit {
            return Err(StreamError::RoomLimit {
                limit: self.config.total_room_limit,
            });
        }
        let slot = self.reserve_active()?;

        let entry = Arc::new(StreamEntry::empty(self.config.stream_data_limit));
        streams.insert(name.to_string(), Arc::clone(&entry));
        slot.keep();

        tracing::info!(
            room = name,
            rooms = streams.len(),
            active = self.room_count(),
            "Room created"
        );

        Ok(entry)
    }

    /// Bring a dumped room's bytes back from the backer
    ///
    /// No-op returning `false` if the room is already loaded. The slot taken
    /// for the reload is given back if the read fails or the caller goes away
    /// while it is in flight.
    async fn refresh(&self, name: &str, state: &mut EntryState) -> Result<bool> {
        if state.is_loaded() {
            return Ok(false);
        }

        let slot = self.reserve_active()?;

        let backing = self.backer.read(name, self.config.stream_data_limit).await?;
        state.load(backing.data, self.config.stream_data_limit)?;
        slot.keep();

        Ok(true)
    }

    /// Take one active slot, failing if none is free
    fn reserve_active(&self) -> Result<ActiveSlot<'_>> {
        let limit = self.config.active_room_limit;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ActiveSlot {
                active: &self.active,
                kept: false,
            })
            .map_err(|_| StreamError::ActiveRoomLimit { limit })
    }

    fn release_active(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An active slot reserved for a room about to be loaded
///
/// Released on drop unless [`keep`](Self::keep) is called once the room's
/// bytes are resident.
struct ActiveSlot<'a> {
    active: &'a AtomicUsize,
    kept: bool,
}

impl ActiveSlot<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
