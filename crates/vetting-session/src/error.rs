//! Error types for the session coordinator
//!
//! Nothing here is fatal to the process. Every variant resolves to a no-op
//! or to a well-defined forced transition. Only `PermissionDenied` and
//! `Restricted` are meant to reach the end user as explicit messages.

use vetting_workflow::ParticipantId;

/// Session coordinator error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Actor lacks the role for this action; silent no-op
    #[error("guard rejected: {0}")]
    GuardRejected(String),

    /// Duplicate join or duplicate transition; idempotent no-op
    #[error("already in requested state")]
    AlreadyInState,

    /// Capture device refused; join aborted with nothing mutated
    #[error("capture permission denied for {participant}: {reason}")]
    PermissionDenied {
        participant: ParticipantId,
        reason: String,
    },

    /// Participant is barred from joining until reactivated
    #[error("participant {0} is restricted from joining")]
    Restricted(ParticipantId),

    /// The countdown lapsed; the session has been closed as expired
    #[error("session expired")]
    ExpiredSession,

    /// No session is active
    #[error("no active session")]
    SessionNotActive,

    /// Participant has not joined the active session
    #[error("participant {0} has not joined")]
    NotJoined(ParticipantId),

    /// Session duration or schedule is unusable
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl SessionError {
    /// Errors that are surfaced to the participant as explicit messages
    #[inline]
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::Restricted(_))
    }

    /// Errors that callers should treat as a no-op
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::GuardRejected(_) | Self::AlreadyInState)
    }
}
