//! Local persistent store for offline support.
//!
//! This module holds everything that must survive a restart:
//! - Queued mutating requests, replayed in sequence order once online
//! - Dead letters: queued requests the service refused, kept for inspection
//! - Cached reads: the last snapshot of each reference resource
//!
//! Storage is SQLite when available and memory otherwise (see [`init`]).

mod layer;
mod storage;
mod types;

pub use layer::{CacheLayer, CacheResult, CacheSource};
pub use storage::{init, LocalStore, MemoryStore, SqliteStore, StoreError};
pub use types::{CacheEntry, DeadRequest, QueuedRequest, RequestStatus};
