//! Error types for the vetting service

use std::path::PathBuf;
use vetting_session::SessionError;
use vetting_workflow::WorkflowError;

/// Top-level service error
#[derive(Debug, thiserror::Error)]
pub enum VettingError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VettingError {
    /// Whether the caller can carry on after this error
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Workflow(e) => e.is_recoverable(),
            Self::Session(_) => true,
            Self::Store(e) => e.is_transient(),
            Self::Config(_) => false,
        }
    }

    /// Whether this should be shown to the participant
    #[inline]
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Session(e) if e.is_user_visible())
    }
}

/// Durable store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// Configuration loading or validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {key} has invalid value {value:?}")]
    Env { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
