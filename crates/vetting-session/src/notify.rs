use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{info, warn};
use vetting_workflow::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Critical,
}

/// Fire-and-forget notification delivery. No confirmation is expected.
pub trait NotificationSink: Send + Sync + Debug {
    fn notify(&self, target: &ParticipantId, title: &str, message: &str, level: NoticeLevel);
}

/// Sink that only writes notifications to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, target: &ParticipantId, title: &str, message: &str, level: NoticeLevel) {
        match level {
            NoticeLevel::Info => info!(%target, title, message, "notification"),
            NoticeLevel::Warning | NoticeLevel::Critical => {
                warn!(%target, title, message, ?level, "notification");
            }
        }
    }
}
