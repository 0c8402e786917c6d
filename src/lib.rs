//! Bounded, persisted append-only byte rooms with long-poll tail reads
//!
//! A writer appends opaque bytes to a named room; any number of readers tail
//! the room from a byte offset, optionally waiting until more bytes arrive.
//! Rooms have a fixed capacity, the number of rooms (and of rooms resident in
//! memory) is bounded, and idle rooms are dumped to a [`Backer`] so their
//! memory can be released and the content reloaded on next access.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use webstream::{FileBacker, StreamSystem, SystemConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SystemConfig::default();
//! let backer = Arc::new(FileBacker::open(&config.stream_folder).await?);
//! let system = Arc::new(StreamSystem::new(config, backer).await?);
//!
//! let shutdown = CancellationToken::new();
//! let dumper = system.spawn_dump_task(shutdown.clone());
//!
//! system.append_data("drawroom", b"line 1,2,3,4;").await?;
//! let bytes = system.read_data("drawroom", 0, None, None).await?;
//! assert_eq!(&bytes[..], b"line 1,2,3,4;");
//!
//! shutdown.cancel();
//! dumper.await?;
//! # Ok(())
//! # }
//! ```

pub mod backer;
pub mod registry;

pub use backer::{Backer, BackerEvent, Backing, FileBacker, MemoryBacker};
pub use registry::{
    AppendedChunk, ConfigError, StreamConstants, StreamEntry, StreamError, StreamInfo,
    StreamSystem, SystemConfig,
};
