use crate::error::WorkflowError;
use crate::state_machine::Stage;
use crate::types::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub message: String,
    pub stage: Stage,
}

impl TimelineEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        message: impl Into<String>,
        stage: Stage,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            actor: actor.into(),
            message: message.into(),
            stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ChainLink {
    event: TimelineEvent,
    prev_hash: [u8; 32],
    hash: [u8; 32],
}

/// Append-only audit log. Each event is chained to its predecessor by hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    links: Vec<ChainLink>,
}

impl Timeline {
    pub fn append(&mut self, event: TimelineEvent) -> EventId {
        let prev_hash = self.links.last().map_or([0u8; 32], |l| l.hash);
        let hash = compute_hash(&event, &prev_hash);
        let id = event.id;
        self.links.push(ChainLink {
            event,
            prev_hash,
            hash,
        });
        id
    }

    /// Events, newest first.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.links.iter().rev().map(|l| l.event.clone()).collect()
    }

    pub fn latest(&self) -> Option<&TimelineEvent> {
        self.links.last().map(|l| &l.event)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Hex digest of the chain head, empty for a fresh timeline.
    pub fn head_digest(&self) -> String {
        self.links.last().map(|l| hex::encode(l.hash)).unwrap_or_default()
    }

    pub fn verify_integrity(&self) -> Result<(), WorkflowError> {
        let mut prev = [0u8; 32];
        for (index, link) in self.links.iter().enumerate() {
            if link.prev_hash != prev || link.hash != compute_hash(&link.event, &prev) {
                return Err(WorkflowError::IntegrityViolation { index });
            }
            prev = link.hash;
        }
        Ok(())
    }
}

fn compute_hash(event: &TimelineEvent, prev_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.id.0.to_string().as_bytes());
    hasher.update(event.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(event.actor.as_bytes());
    hasher.update([0]);
    hasher.update(event.message.as_bytes());
    hasher.update([0]);
    hasher.update(event.stage.as_str().as_bytes());
    hasher.update(prev_hash);
    hasher.finalize().into()
}
