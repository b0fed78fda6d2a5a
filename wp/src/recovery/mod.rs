//! Crash recovery
//!
//! On startup, every session still marked active was interrupted. The engine
//! validates each one against its checkpoint chain and external resources,
//! resumes what it can, and archives the rest.

mod engine;
mod machine;
mod report;

pub use engine::{RecoveryEngine, RecoveryOptions, ResumedSession};
pub use machine::{Machine, RecoveryEvent, RecoveryState};
pub use report::{RecoveryReport, SessionOutcome};
