//! Per-participant violation monitor
//!
//! Each joined participant gets an independent monitor. Raw client signals
//! are classified into violation kinds, recorded as warnings, and the
//! critical ones are handed back to the coordinator for escalation.
//!
//! Detection here is advisory. A modified or hostile client can simply not
//! report anything, so these readings deter and document misconduct; they
//! do not prevent it. Screen capture in particular cannot be reliably
//! detected, only inferred from indirect signals.
//!
//! Focus loss is handled in two steps: the first report is a warning and
//! arms a grace timer, and only a loss still in effect when the timer is
//! re-checked becomes the critical `SustainedFocusLoss`. A participant who
//! briefly alt-tabs and returns is not excluded.

use crate::archive::{ParticipantRecord, ParticipationOutcome};
use crate::capture::CaptureHandle;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use ulid::Ulid;
use vetting_workflow::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    FocusLoss,
    SustainedFocusLoss,
    RestrictedNavigation,
    CaptureAttempt,
    NewSurface,
    ClipboardAccess,
}

impl ViolationKind {
    pub const ALL: [Self; 6] = [
        Self::FocusLoss,
        Self::SustainedFocusLoss,
        Self::RestrictedNavigation,
        Self::CaptureAttempt,
        Self::NewSurface,
        Self::ClipboardAccess,
    ];

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::SustainedFocusLoss | Self::CaptureAttempt => Severity::Critical,
            Self::FocusLoss
            | Self::RestrictedNavigation
            | Self::NewSurface
            | Self::ClipboardAccess => Severity::Warning,
        }
    }

    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::FocusLoss => "Review window lost focus",
            Self::SustainedFocusLoss => "Review window stayed out of focus past the grace period",
            Self::RestrictedNavigation => "Attempted to navigate away from the review",
            Self::CaptureAttempt => "Screen capture attempt detected",
            Self::NewSurface => "Attempted to open a new window or tab",
            Self::ClipboardAccess => "Clipboard access blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub id: Ulid,
    pub participant_id: ParticipantId,
    pub kind: ViolationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
}

impl Warning {
    pub fn new(participant_id: ParticipantId, kind: ViolationKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Ulid::new(),
            participant_id,
            kind,
            message: kind.describe().to_string(),
            timestamp,
            severity: kind.severity(),
        }
    }
}

/// Bounded warning history.
///
/// Keeps the most recent `capacity` warnings; totals keep counting past the
/// cap so the violation count is never understated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningLog {
    capacity: usize,
    recent: VecDeque<Warning>,
    total: u32,
    critical: u32,
}

impl WarningLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: VecDeque::with_capacity(capacity.max(1)),
            total: 0,
            critical: 0,
        }
    }

    /// Rebuild a log from an earlier record, keeping its totals
    #[must_use]
    pub fn resume(capacity: usize, warnings: Vec<Warning>, total: u32, critical: u32) -> Self {
        let mut log = Self::with_capacity(capacity);
        let skip = warnings.len().saturating_sub(log.capacity);
        log.recent.extend(warnings.into_iter().skip(skip));
        log.total = total;
        log.critical = critical;
        log
    }

    pub fn push(&mut self, warning: Warning) {
        self.total = self.total.saturating_add(1);
        if warning.severity == Severity::Critical {
            self.critical = self.critical.saturating_add(1);
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(warning);
    }

    /// Retained warnings, oldest first
    pub fn recent(&self) -> impl Iterator<Item = &Warning> {
        self.recent.iter()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Warning> {
        self.recent.iter().cloned().collect()
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub const fn critical_count(&self) -> u32 {
        self.critical
    }
}

/// What the coordinator should do with an ingested signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalVerdict {
    /// Participant is not under enforcement
    Ignored,
    /// Warning recorded, nothing further
    Recorded(Warning),
    /// Focus loss recorded and grace re-check armed
    GraceArmed(Warning),
    /// Critical violation; exclude the participant
    Escalate(Warning),
}

impl SignalVerdict {
    #[must_use]
    pub fn warning(&self) -> Option<&Warning> {
        match self {
            Self::Ignored => None,
            Self::Recorded(w) | Self::GraceArmed(w) | Self::Escalate(w) => Some(w),
        }
    }

    #[must_use]
    pub const fn escalates(&self) -> bool {
        matches!(self, Self::Escalate(_))
    }
}

#[derive(Debug)]
pub struct ParticipantMonitor {
    participant_id: ParticipantId,
    display_name: String,
    joined_at: DateTime<Utc>,
    enforced: bool,
    capture: Option<CaptureHandle>,
    warnings: WarningLog,
    focus_lost_at: Option<DateTime<Utc>>,
}

impl ParticipantMonitor {
    pub fn new(
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        joined_at: DateTime<Utc>,
        capture: Option<CaptureHandle>,
        warning_capacity: usize,
    ) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
            joined_at,
            enforced: capture.is_some(),
            capture,
            warnings: WarningLog::with_capacity(warning_capacity),
            focus_lost_at: None,
        }
    }

    /// Monitor for a participant who is present but not proctored
    pub fn unenforced(
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        joined_at: DateTime<Utc>,
        warning_capacity: usize,
    ) -> Self {
        let mut monitor = Self::new(participant_id, display_name, joined_at, None, warning_capacity);
        monitor.enforced = false;
        monitor
    }

    /// Carry warnings from an earlier stint in the same session
    #[must_use]
    pub fn with_history(mut self, prior: ParticipantRecord) -> Self {
        let capacity = self.warnings.capacity;
        self.warnings = WarningLog::resume(
            capacity,
            prior.warnings,
            prior.total_warnings,
            prior.violation_count,
        );
        self.joined_at = prior.joined_at;
        self
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub const fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub const fn is_enforced(&self) -> bool {
        self.enforced
    }

    pub const fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    /// Number of critical violations
    pub const fn violation_count(&self) -> u32 {
        self.warnings.critical_count()
    }

    pub const fn focus_lost_at(&self) -> Option<DateTime<Utc>> {
        self.focus_lost_at
    }

    pub fn take_capture(&mut self) -> Option<CaptureHandle> {
        self.capture.take()
    }

    /// Classify and record one client signal
    pub fn ingest(&mut self, kind: ViolationKind, now: DateTime<Utc>) -> SignalVerdict {
        if !self.enforced {
            return SignalVerdict::Ignored;
        }
        // sustained loss is only ever confirmed by the grace re-check
        let kind = match kind {
            ViolationKind::SustainedFocusLoss => ViolationKind::FocusLoss,
            other => other,
        };
        let warning = Warning::new(self.participant_id.clone(), kind, now);
        self.warnings.push(warning.clone());

        match kind {
            ViolationKind::FocusLoss => {
                self.focus_lost_at.get_or_insert(now);
                SignalVerdict::GraceArmed(warning)
            }
            k if k.severity() == Severity::Critical => SignalVerdict::Escalate(warning),
            _ => SignalVerdict::Recorded(warning),
        }
    }

    /// Disarms a pending grace re-check. Returns `true` if one was armed.
    pub fn focus_regained(&mut self) -> bool {
        self.focus_lost_at.take().is_some()
    }

    /// Confirm a focus loss that outlived the grace period
    pub fn check_grace(&mut self, now: DateTime<Utc>, grace: Duration) -> Option<Warning> {
        let lost_at = self.focus_lost_at?;
        if now - lost_at < grace {
            return None;
        }
        self.focus_lost_at = None;
        let warning = Warning::new(
            self.participant_id.clone(),
            ViolationKind::SustainedFocusLoss,
            now,
        );
        self.warnings.push(warning.clone());
        Some(warning)
    }

    pub fn into_record(self, left_at: DateTime<Utc>, outcome: ParticipationOutcome) -> ParticipantRecord {
        ParticipantRecord {
            participant_id: self.participant_id,
            display_name: self.display_name,
            joined_at: self.joined_at,
            left_at,
            outcome,
            enforced: self.enforced,
            total_warnings: self.warnings.total(),
            violation_count: self.warnings.critical_count(),
            warnings: self.warnings.to_vec(),
        }
    }
}
