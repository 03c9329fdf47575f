use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BackendKind, SequenceKey};

/// Overall state of the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// A remote backend answered and the counters could be listed.
    Healthy,
    /// Numbers may still be issued, but from the local fallback, or the
    /// counters could not be read.
    Degraded,
}

/// Diagnostic snapshot returned by [`SequenceManager::health_report`].
///
/// [`SequenceManager::health_report`]: crate::SequenceManager::health_report
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub backend: BackendKind,
    pub atomic: bool,
    pub warnings: Vec<String>,
    pub sequences: BTreeMap<SequenceKey, u64>,
    pub max_sequence: Option<u64>,
    pub min_sequence: Option<u64>,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            status: HealthStatus::Healthy,
            backend,
            atomic: backend.is_atomic(),
            warnings: Vec::new(),
            sequences: BTreeMap::new(),
            max_sequence: None,
            min_sequence: None,
            generated_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Adds a warning without changing the status.
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Adds a warning and marks the report degraded.
    pub fn degrade(&mut self, warning: impl Into<String>) {
        self.status = HealthStatus::Degraded;
        self.warn(warning);
    }

    pub fn set_sequences(&mut self, sequences: BTreeMap<SequenceKey, u64>) {
        self.max_sequence = sequences.values().copied().max();
        self.min_sequence = sequences.values().copied().min();
        self.sequences = sequences;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_set_the_bounds() {
        let mut report = HealthReport::new(BackendKind::RemoteRpc);
        assert!(report.atomic);
        report.set_sequences(BTreeMap::from([
            (SequenceKey::new("akdcah_seq"), 340),
            (SequenceKey::new("bddcsg_seq"), 302),
        ]));
        assert_eq!(report.max_sequence, Some(340));
        assert_eq!(report.min_sequence, Some(302));
        assert!(report.is_healthy());
    }

    #[test]
    fn serialises_with_lowercase_names() {
        let mut report = HealthReport::new(BackendKind::LocalFile);
        report.degrade("using the local fallback store");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["backend"], "local");
        assert_eq!(json["atomic"], false);
        assert_eq!(json["warnings"][0], "using the local fallback store");
        assert!(json["max_sequence"].is_null());
    }
}
