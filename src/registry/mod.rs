//! Room registry for append and tail-read routing
//!
//! The registry owns every room seen since start and routes appends from
//! writers to the readers waiting on that room. Waiting readers each hold a
//! `tokio::sync::oneshot` completion that the next append resolves.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamSystem>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Name,  │
//!                     │   StreamEntry {         │
//!                     │     data, length,       │
//!                     │     waiters: [oneshot], │
//!                     │   }                     │
//!                     │ >                       │
//!                     │ active: AtomicUsize     │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!     [Writer]                [Reader]                [Reader]
//!   append_data()           read_data()             read_data()
//!         │                       ▲                       ▲
//!         └──► entry.append() ────┴── AppendedChunk ──────┘
//!                    │
//!                    └──► dump_streams() ──► Backer
//! ```
//!
//! # Zero-Copy Fan-out
//!
//! The appended bytes are copied once into a `bytes::Bytes`; every released
//! reader gets a reference-counted handle to the same allocation.

pub mod chunk;
pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use chunk::AppendedChunk;
pub use config::{ConfigError, StreamConstants, SystemConfig};
pub use entry::{StreamEntry, StreamInfo};
pub use error::StreamError;
pub use store::StreamSystem;
