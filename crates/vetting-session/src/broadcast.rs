//! Best-effort session signals
//!
//! Dropped messages are acceptable. Nothing durable depends on this channel.

use crate::archive::SessionStatus;
use crate::monitor::ViolationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use vetting_workflow::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionSignal {
    Typing {
        section_key: String,
        participant_id: ParticipantId,
        display_name: String,
    },
    Draft {
        section_key: String,
        participant_id: ParticipantId,
        text: String,
    },
    DraftCleared {
        section_key: String,
        participant_id: ParticipantId,
    },
    CommentSaved {
        section_key: String,
        author_id: ParticipantId,
        timestamp: DateTime<Utc>,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
        enforced: bool,
    },
    ParticipantExcluded {
        participant_id: ParticipantId,
        kind: ViolationKind,
    },
    SessionClosed {
        status: SessionStatus,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<SessionSignal>,
}

impl SignalBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, signal: SessionSignal) -> usize {
        match self.tx.send(signal) {
            Ok(n) => n,
            Err(broadcast::error::SendError(signal)) => {
                trace!(?signal, "no subscribers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.tx.subscribe()
    }
}
