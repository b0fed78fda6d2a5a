//! WayStore - durable file-backed record store
//!
//! Stores named byte records with atomic replace semantics: every write lands
//! in a temp file, is fsynced, and is renamed over the previous record. Each
//! record carries a checksummed frame so a torn or tampered file is reported
//! as corrupted instead of being returned half-read.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── .lock                 # single-writer advisory lock
//! ├── sessions/{id}.rec
//! ├── checkpoints/{task}/{seq}.rec
//! └── index/...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use waystore::{FileStore, RecordStore, RecordStoreExt};
//!
//! let store = FileStore::open("/var/lib/waypoint")?;
//! store.put_json("sessions/abc", &session)?;
//! for key in store.list("sessions/")?.iter() {
//!     println!("{}", key?);
//! }
//! ```

pub mod cli;
mod error;
mod file;
pub mod frame;
pub mod key;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{KeyIter, KeyListing, RecordStore, RecordStoreExt};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
