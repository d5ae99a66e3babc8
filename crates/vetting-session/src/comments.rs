//! Collaborative comment store
//!
//! Three structures with very different durability:
//!
//! - [`CommentStore`]: committed comments, one per section key,
//!   last-write-wins on the writer's timestamp.
//! - [`PresenceBoard`]: who is typing where, each entry expiring after a
//!   short TTL.
//! - [`DraftBoard`]: uncommitted text per participant per section.
//!
//! Only the first is part of the session record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vetting_workflow::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub text: String,
    pub author_id: ParticipantId,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
    pub color_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentStore {
    entries: BTreeMap<String, CommentEntry>,
}

impl CommentStore {
    /// Apply a save. Older writes lose; equal timestamps go to the newer call.
    ///
    /// Returns `false` if the write was superseded by a later one already
    /// stored.
    pub fn save(&mut self, section_key: impl Into<String>, entry: CommentEntry) -> bool {
        let key = section_key.into();
        match self.entries.get(&key) {
            Some(existing) if existing.timestamp > entry.timestamp => false,
            _ => {
                self.entries.insert(key, entry);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, section_key: &str) -> Option<&CommentEntry> {
        self.entries.get(section_key)
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, CommentEntry> {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> BTreeMap<String, CommentEntry> {
        self.entries
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

impl From<BTreeMap<String, CommentEntry>> for CommentStore {
    fn from(entries: BTreeMap<String, CommentEntry>) -> Self {
        Self { entries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPresence {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceBoard {
    by_key: BTreeMap<String, BTreeMap<ParticipantId, TypingPresence>>,
}

impl PresenceBoard {
    pub fn touch(
        &mut self,
        section_key: &str,
        participant_id: &ParticipantId,
        display_name: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) {
        self.by_key.entry(section_key.to_string()).or_default().insert(
            participant_id.clone(),
            TypingPresence {
                participant_id: participant_id.clone(),
                display_name: display_name.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&mut self, section_key: &str, participant_id: &ParticipantId) {
        if let Some(entries) = self.by_key.get_mut(section_key) {
            entries.remove(participant_id);
            if entries.is_empty() {
                self.by_key.remove(section_key);
            }
        }
    }

    pub fn remove_participant(&mut self, participant_id: &ParticipantId) {
        self.by_key.retain(|_, entries| {
            entries.remove(participant_id);
            !entries.is_empty()
        });
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.by_key.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|_, p| p.expires_at > now);
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Live typists on a section
    #[must_use]
    pub fn typing(&self, section_key: &str, now: DateTime<Utc>) -> Vec<TypingPresence> {
        self.by_key
            .get(section_key)
            .map(|entries| {
                entries
                    .values()
                    .filter(|p| p.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftBoard {
    by_key: BTreeMap<String, BTreeMap<ParticipantId, String>>,
}

impl DraftBoard {
    pub fn set(&mut self, section_key: &str, participant_id: &ParticipantId, text: impl Into<String>) {
        self.by_key
            .entry(section_key.to_string())
            .or_default()
            .insert(participant_id.clone(), text.into());
    }

    pub fn clear(&mut self, section_key: &str, participant_id: &ParticipantId) -> bool {
        let Some(drafts) = self.by_key.get_mut(section_key) else {
            return false;
        };
        let removed = drafts.remove(participant_id).is_some();
        if drafts.is_empty() {
            self.by_key.remove(section_key);
        }
        removed
    }

    pub fn clear_participant(&mut self, participant_id: &ParticipantId) {
        self.by_key.retain(|_, drafts| {
            drafts.remove(participant_id);
            !drafts.is_empty()
        });
    }

    #[must_use]
    pub fn drafts(&self, section_key: &str) -> BTreeMap<ParticipantId, String> {
        self.by_key.get(section_key).cloned().unwrap_or_default()
    }
}
