//! Revision ledger and destruction log
//!
//! The revision ledger is the human-readable version history of the paper's
//! content: labels read `v{major}.{sequence}`, where the sequence restarts at
//! 1 for every major revision.

use crate::types::EntryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionLedgerEntry {
    pub id: EntryId,
    pub major_revision: u32,
    pub sequence: u32,
    pub label: String,
    pub actor: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

/// Format a ledger label
#[inline]
#[must_use]
pub fn revision_label(major_revision: u32, sequence: u32) -> String {
    format!("v{major_revision}.{sequence}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionLedger {
    entries: Vec<RevisionLedgerEntry>,
}

impl RevisionLedger {
    /// Append the next entry for `major_revision`
    pub fn record(
        &mut self,
        major_revision: u32,
        actor: impl Into<String>,
        notes: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> &RevisionLedgerEntry {
        let sequence = self.next_sequence(major_revision);
        self.entries.push(RevisionLedgerEntry {
            id: EntryId::new(),
            major_revision,
            sequence,
            label: revision_label(major_revision, sequence),
            actor: actor.into(),
            notes: notes.into(),
            timestamp,
        });
        &self.entries[self.entries.len() - 1]
    }

    fn next_sequence(&self, major_revision: u32) -> u32 {
        self.entries
            .iter()
            .rev()
            .find(|e| e.major_revision == major_revision)
            .map_or(1, |e| e.sequence + 1)
    }

    #[must_use]
    pub fn entries(&self) -> &[RevisionLedgerEntry] {
        &self.entries
    }

    pub fn entries_for(&self, major_revision: u32) -> impl Iterator<Item = &RevisionLedgerEntry> {
        self.entries
            .iter()
            .filter(move |e| e.major_revision == major_revision)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&RevisionLedgerEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Record that a rejected revision is slated for secure disposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestructionLogEntry {
    pub id: EntryId,
    pub revision: u32,
    pub actor: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl DestructionLogEntry {
    pub fn new(
        revision: u32,
        actor: impl Into<String>,
        reason: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            revision,
            actor: actor.into(),
            reason: reason.into(),
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sequence_restarts_per_major_revision() {
        let mut ledger = RevisionLedger::default();
        let now = Utc::now();
        ledger.record(1, "a", "init", now);
        ledger.record(1, "a", "submit", now);
        ledger.record(2, "fa", "restart", now);
        ledger.record(2, "c", "compile", now);

        let labels: Vec<_> = ledger.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["v1.1", "v1.2", "v2.1", "v2.2"]);
        assert_eq!(ledger.entries_for(1).count(), 2);
    }

    proptest! {
        #[test]
        fn prop_sequences_are_contiguous(majors in proptest::collection::vec(1u32..4, 1..40)) {
            let mut ledger = RevisionLedger::default();
            let now = Utc::now();
            for major in &majors {
                ledger.record(*major, "x", "", now);
            }
            for major in 1u32..4 {
                let seqs: Vec<u32> = ledger.entries_for(major).map(|e| e.sequence).collect();
                let expected: Vec<u32> = (1..=seqs.len() as u32).collect();
                prop_assert_eq!(seqs, expected);
            }
        }
    }
}
