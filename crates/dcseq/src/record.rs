use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SequenceKey;

/// Value a counter holds the first time its key is seen. The first number
/// handed out for a fresh key is `DEFAULT_FLOOR + 1`.
pub const DEFAULT_FLOOR: u64 = 300;

/// Maximum number of history entries kept per key.
pub const HISTORY_LIMIT: usize = 10;

/// One audit entry: the value a counter moved to, and when.
///
/// Timestamps are kept as the stored text so histories written by older
/// clients (naive ISO-8601 without an offset) survive a rewrite untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: u64,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn new(value: u64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            timestamp: at.to_rfc3339(),
        }
    }
}

/// A persisted counter with its bounded audit trail.
///
/// `value` never decreases through [`SequenceRecord::advance`]; each call moves
/// it up by exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceRecord {
    key: SequenceKey,
    value: u64,
    last_updated: Option<DateTime<Utc>>,
    history: VecDeque<HistoryEntry>,
}

impl SequenceRecord {
    /// A record that has never been incremented.
    pub fn new(key: SequenceKey, floor: u64) -> Self {
        Self {
            key,
            value: floor,
            last_updated: None,
            history: VecDeque::new(),
        }
    }

    /// Rebuilds a record from stored parts, keeping only the newest
    /// [`HISTORY_LIMIT`] entries.
    pub fn from_parts(
        key: SequenceKey,
        value: u64,
        last_updated: Option<DateTime<Utc>>,
        history: impl IntoIterator<Item = HistoryEntry>,
    ) -> Self {
        let mut record = Self {
            key,
            value,
            last_updated,
            history: history.into_iter().collect(),
        };
        record.trim_history();
        record
    }

    pub fn key(&self) -> &SequenceKey {
        &self.key
    }

    pub const fn value(&self) -> u64 {
        self.value
    }

    pub const fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Increments the counter by one and logs the new value.
    pub fn advance(&mut self, now: DateTime<Utc>) -> u64 {
        self.value += 1;
        self.last_updated = Some(now);
        self.history.push_back(HistoryEntry::new(self.value, now));
        self.trim_history();
        self.value
    }

    /// Administrative override. History is left alone: it only records
    /// increments.
    pub fn set(&mut self, value: u64, now: DateTime<Utc>) {
        self.value = value;
        self.last_updated = Some(now);
    }

    pub fn into_history(self) -> Vec<HistoryEntry> {
        self.history.into()
    }

    fn trim_history(&mut self) {
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_by_one_and_bounds_history() {
        let now = Utc::now();
        let mut record = SequenceRecord::new(SequenceKey::new("akdcah_seq"), DEFAULT_FLOOR);
        assert_eq!(record.value(), 300);
        assert_eq!(record.last_updated(), None);

        for expected in 301..=315 {
            assert_eq!(record.advance(now), expected);
        }

        assert_eq!(record.history().len(), HISTORY_LIMIT);
        let first = record.history().next().unwrap();
        assert_eq!(first.value, 306);
        assert_eq!(record.last_updated(), Some(now));
    }

    #[test]
    fn set_does_not_log_history() {
        let mut record = SequenceRecord::new(SequenceKey::new("bddcsg_seq"), DEFAULT_FLOOR);
        record.set(500, Utc::now());
        assert_eq!(record.value(), 500);
        assert_eq!(record.history().len(), 0);
    }

    #[test]
    fn from_parts_keeps_newest_entries() {
        let now = Utc::now();
        let entries = (1..=12).map(|v| HistoryEntry::new(v, now));
        let record = SequenceRecord::from_parts(SequenceKey::new("k_seq"), 12, None, entries);
        let values: Vec<_> = record.history().map(|e| e.value).collect();
        assert_eq!(values, (3..=12).collect::<Vec<_>>());
    }
}
