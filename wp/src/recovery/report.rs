//! Recovery report

use serde::Serialize;
use std::collections::BTreeMap;

/// How recovery classified one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Resumed and left active
    Resumed,
    /// Archived because it could not be resumed
    Cleaned { reason: String },
    /// Neither resumed nor archived
    Failed { reason: String },
}

/// Result of a recovery run
///
/// Every session that was active at the start appears in exactly one list.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub cleaned: Vec<String>,
    pub failed: Vec<String>,
    /// Why each cleaned or failed session ended up there
    pub reasons: BTreeMap<String, String>,
    /// Shutdown arrived before every session was dispatched
    pub interrupted: bool,
}

impl RecoveryReport {
    /// Record the outcome for a session
    pub fn record(&mut self, session_id: String, outcome: SessionOutcome) {
        match outcome {
            SessionOutcome::Resumed => self.resumed.push(session_id),
            SessionOutcome::Cleaned { reason } => {
                self.reasons.insert(session_id.clone(), reason);
                self.cleaned.push(session_id);
            }
            SessionOutcome::Failed { reason } => {
                self.reasons.insert(session_id.clone(), reason);
                self.failed.push(session_id);
            }
        }
    }

    /// Sort the id lists
    pub fn finalize(mut self) -> Self {
        self.resumed.sort();
        self.cleaned.sort();
        self.failed.sort();
        self
    }

    /// Number of sessions classified
    pub fn total(&self) -> usize {
        self.resumed.len() + self.cleaned.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl std::fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resumed: {}, cleaned: {}, failed: {}",
            self.resumed.len(),
            self.cleaned.len(),
            self.failed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_finalize() {
        let mut report = RecoveryReport::default();
        report.record("s3".to_string(), SessionOutcome::Cleaned { reason: "gap".to_string() });
        report.record("s1".to_string(), SessionOutcome::Resumed);
        report.record("s2".to_string(), SessionOutcome::Cleaned { reason: "gone".to_string() });
        let report = report.finalize();

        assert_eq!(report.resumed, vec!["s1"]);
        assert_eq!(report.cleaned, vec!["s2", "s3"]);
        assert!(report.failed.is_empty());
        assert_eq!(report.reasons["s3"], "gap");
        assert_eq!(report.total(), 3);
        assert_eq!(report.to_string(), "resumed: 1, cleaned: 2, failed: 0");
    }
}
