//! Capture device boundary
//!
//! Acquiring the capture device is the precondition for joining a session.
//! Release is best effort: a handle may already be dead when the session
//! closes, and that must not stop the close.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use ulid::Ulid;
use vetting_workflow::ParticipantId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureHandle {
    pub id: Ulid,
    pub participant_id: ParticipantId,
}

impl CaptureHandle {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            id: Ulid::new(),
            participant_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("capture permission denied: {0}")]
    Denied(String),

    #[error("capture handle {0} already released")]
    AlreadyReleased(Ulid),

    #[error("capture device failure: {0}")]
    Device(String),
}

/// Provider of per-participant capture devices
#[async_trait]
pub trait CaptureProvider: Send + Sync + Debug {
    /// Ask for the device; may suspend while the participant answers a prompt
    async fn acquire(&self, participant: &ParticipantId) -> Result<CaptureHandle, CaptureError>;

    async fn release(&self, handle: CaptureHandle) -> Result<(), CaptureError>;
}
