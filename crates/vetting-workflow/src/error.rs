//! Error types for the workflow crate
//!
//! Guard failures are not errors: they come back as
//! [`crate::GuardRejection`] inside a [`crate::TransitionOutcome`].

/// Workflow error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// Timeline hash chain does not verify
    #[error("timeline integrity violation at event {index}")]
    IntegrityViolation { index: usize },

    /// Persisted snapshot cannot be restored
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl WorkflowError {
    /// Check if the error leaves the engine usable
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::IntegrityViolation { .. })
    }
}
