//! Opening book backend
//!
//! Job queue, client leases, refill lock and level statistics over a shared
//! [`kv::KeyValueStore`], plus the authoritative [`store::BookStore`]. Both
//! have SQLite implementations so workers in separate processes can share
//! one database file.

pub mod config;
pub mod error;
pub mod kv;
pub mod lease;
pub mod lock;
pub mod queue;
pub mod seed;
pub mod sqlite_kv;
pub mod stats;
pub mod store;

pub use config::BookConfig;
pub use error::{BackendError, BackendResult};
pub use kv::{KeyValueStore, MemoryStore};
pub use lease::{ClientLease, Lease};
pub use lock::{LockGuard, SingleFlightLock};
pub use queue::{BookQueue, RefillOutcome};
pub use sqlite_kv::SqliteKeyValueStore;
pub use stats::{target_level, BookStats, StatsCache};
pub use store::{BookStore, LevelChange, LevelCount, SqliteBookStore};
