//! Immutable records written when a session closes

use crate::comments::CommentEntry;
use crate::monitor::Warning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;
use vetting_workflow::{PaperId, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Completed,
    Terminated,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// The final authority ended the session early
    EndedByAuthority,
    /// The countdown reached zero
    Expired,
    /// Every reviewer finished
    ReviewCompleted,
}

impl CloseReason {
    #[must_use]
    pub const fn status(self) -> SessionStatus {
        match self {
            Self::EndedByAuthority => SessionStatus::Terminated,
            Self::Expired => SessionStatus::Expired,
            Self::ReviewCompleted => SessionStatus::Completed,
        }
    }

    #[must_use]
    pub const fn is_expiry(self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// How a participant's time in the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipationOutcome {
    Left,
    Completed,
    Excluded,
    PresentAtClose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: DateTime<Utc>,
    pub outcome: ParticipationOutcome,
    pub enforced: bool,
    pub warnings: Vec<Warning>,
    pub total_warnings: u32,
    pub violation_count: u32,
}

/// Free-form note attached to a section, kept alongside the comments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Ulid,
    pub section_key: String,
    pub participant_id: ParticipantId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Ulid,
    pub paper_ids: Vec<PaperId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub participants: Vec<ParticipantRecord>,
    pub comments: BTreeMap<String, CommentEntry>,
    pub annotations: Vec<Annotation>,
    pub status: SessionStatus,
}

impl SessionRecord {
    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| &p.participant_id == id)
    }

    #[must_use]
    pub fn excluded(&self) -> Vec<&ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.outcome == ParticipationOutcome::Excluded)
            .map(|p| &p.participant_id)
            .collect()
    }
}
