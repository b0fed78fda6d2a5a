//! Active-session tracking
//!
//! ActiveIndex persists the set of active session ids; SessionTracker builds
//! archival and stale-session cleanup on top of it.

mod index;
mod sessions;

pub use index::{ACTIVE_INDEX_KEY, ActiveIndex};
pub use sessions::SessionTracker;
