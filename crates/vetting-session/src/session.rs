use crate::archive::CloseReason;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Proctoring policy applied to enforced participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyFlags {
    pub capture_on: bool,
    pub screenshot_blocked: bool,
    pub switching_locked: bool,
}

impl PolicyFlags {
    #[must_use]
    pub const fn enforced() -> Self {
        Self {
            capture_on: true,
            screenshot_blocked: true,
            switching_locked: true,
        }
    }
}

/// The single system-wide review session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReviewSession {
    pub active: bool,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub policy_flags: PolicyFlags,
    pub last_closed_reason: Option<CloseReason>,
}

impl ReviewSession {
    pub(crate) fn activate(&mut self, now: DateTime<Utc>, minutes: u32) {
        self.active = true;
        self.started_at = Some(now);
        self.duration_minutes = Some(minutes);
        self.expires_at = Some(now + Duration::minutes(i64::from(minutes)));
        self.policy_flags = PolicyFlags::enforced();
    }

    pub(crate) fn deactivate(&mut self, reason: CloseReason) {
        self.active = false;
        self.policy_flags = PolicyFlags::default();
        self.last_closed_reason = Some(reason);
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|at| now >= at)
    }

    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .filter(|_| self.active)
            .map(|at| (at - now).max(Duration::zero()))
    }

    /// Whether a scheduled start has been reached while inactive
    #[must_use]
    pub fn schedule_due(&self, now: DateTime<Utc>) -> bool {
        !self.active && self.scheduled_start.is_some_and(|start| now >= start)
    }
}
