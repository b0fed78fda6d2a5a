//! Session state persistence
//!
//! StateManager owns the session records in the durable store and keeps the
//! active-session index consistent with each session's status.

mod error;
mod locks;
mod manager;

pub use error::{StateError, StateResponse};
pub use locks::KeyLocks;
pub use manager::{SESSION_PREFIX, StateManager, session_key};
