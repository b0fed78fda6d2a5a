//! Domain types for Waypoint
//!
//! Core domain types: Session, Checkpoint.
//! Both are persisted as JSON records in the durable store.

mod checkpoint;
mod id;
mod session;

pub use checkpoint::{Checkpoint, CheckpointId, checkpoint_prefix};
pub use id::{generate_id, is_valid_id};
pub use session::{ContainerRef, ContextFragment, Session, SessionStatus};

// Re-export waystore types for convenience
pub use waystore::{MemoryStore, RecordStore, RecordStoreExt, now_ms};
