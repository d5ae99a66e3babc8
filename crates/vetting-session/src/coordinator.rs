//! Session coordinator
//!
//! Owns the single review session and everything attached to it: the
//! participant monitors, the restricted set, the comment store, presence,
//! drafts and the archive of closed sessions.
//!
//! # Locking
//!
//! All state sits behind one `parking_lot::Mutex`. The lock is never held
//! across an `.await`: joins check preconditions, release the lock while
//! the capture device is acquired, then re-check before admitting. Closes
//! flip `active` under the lock and release capture handles after it.
//!
//! # Invariants
//!
//! - A participant is never both joined and restricted. Exclusion removes
//!   the monitor and restricts in the same critical section.
//! - Closing is idempotent; only the first close writes a record.
//! - Every joined participant is either enforced with a live capture
//!   handle, or is the final authority joining unenforced.

use crate::archive::{Annotation, CloseReason, ParticipantRecord, ParticipationOutcome, SessionRecord};
use crate::broadcast::{SessionSignal, SignalBus};
use crate::capture::{CaptureHandle, CaptureProvider};
use crate::comments::{CommentEntry, CommentStore, DraftBoard, PresenceBoard, TypingPresence};
use crate::error::SessionError;
use crate::monitor::{ParticipantMonitor, SignalVerdict, ViolationKind, Warning};
use crate::notify::{NoticeLevel, NotificationSink};
use crate::restriction::RestrictedSet;
use crate::session::{PolicyFlags, ReviewSession};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ulid::Ulid;
use vetting_workflow::{Actor, Clock, PaperId, ParticipantId, Role};

/// Tunables for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Warnings retained per participant
    pub warning_capacity: usize,
    /// How long a focus loss may last before it is critical
    pub focus_grace: Duration,
    /// Lifetime of a typing indicator
    pub presence_ttl: Duration,
    pub broadcast_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            warning_capacity: 50,
            focus_grace: Duration::seconds(5),
            presence_ttl: Duration::seconds(3),
            broadcast_capacity: 256,
        }
    }
}

/// Returned to a participant on a successful join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReceipt {
    pub participant_id: ParticipantId,
    pub joined_at: DateTime<Utc>,
    pub enforced: bool,
    pub policy: PolicyFlags,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read-only view of a joined participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub enforced: bool,
    pub warnings: Vec<Warning>,
    pub total_warnings: u32,
    pub violation_count: u32,
}

impl From<&ParticipantMonitor> for ParticipantView {
    fn from(m: &ParticipantMonitor) -> Self {
        Self {
            participant_id: m.participant_id().clone(),
            display_name: m.display_name().to_string(),
            joined_at: m.joined_at(),
            enforced: m.is_enforced(),
            warnings: m.warnings().to_vec(),
            total_warnings: m.warnings().total(),
            violation_count: m.violation_count(),
        }
    }
}

/// What a call to [`SessionCoordinator::poll`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub escalated: Vec<ParticipantId>,
    pub presence_pruned: usize,
    pub closed: Option<SessionRecord>,
}

/// Durable portion of coordinator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: ReviewSession,
    pub paper_ids: Vec<PaperId>,
    pub opened_by: Option<ParticipantId>,
    pub scheduled_by: Option<Actor>,
    pub restricted: RestrictedSet,
    pub comments: BTreeMap<String, CommentEntry>,
    pub annotations: Vec<Annotation>,
    pub archive: Vec<SessionRecord>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    session: ReviewSession,
    session_id: Option<Ulid>,
    paper_ids: Vec<PaperId>,
    opened_by: Option<ParticipantId>,
    scheduled_by: Option<Actor>,
    monitors: BTreeMap<ParticipantId, ParticipantMonitor>,
    pending_joins: BTreeSet<ParticipantId>,
    departed: Vec<ParticipantRecord>,
    restricted: RestrictedSet,
    comments: CommentStore,
    presence: PresenceBoard,
    drafts: DraftBoard,
    annotations: Vec<Annotation>,
    archive: Vec<SessionRecord>,
}

impl CoordinatorState {
    fn admission(&self, id: &ParticipantId, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.session.active {
            return Err(SessionError::SessionNotActive);
        }
        if self.session.is_expired(now) {
            return Err(SessionError::ExpiredSession);
        }
        if self.restricted.contains(id) {
            return Err(SessionError::Restricted(id.clone()));
        }
        if self.monitors.contains_key(id) {
            return Err(SessionError::AlreadyInState);
        }
        Ok(())
    }

    /// Common precondition for actions by an already joined participant
    fn joined(&self, id: &ParticipantId, now: DateTime<Utc>) -> Result<&ParticipantMonitor, SessionError> {
        if !self.session.active {
            return Err(SessionError::SessionNotActive);
        }
        if self.session.is_expired(now) {
            return Err(SessionError::ExpiredSession);
        }
        self.monitors
            .get(id)
            .ok_or_else(|| SessionError::NotJoined(id.clone()))
    }

    /// Restrict a participant and drop their monitor. The restriction
    /// holds even when the session already closed under them.
    fn exclude(
        &mut self,
        id: &ParticipantId,
        now: DateTime<Utc>,
    ) -> Option<(ParticipantRecord, Option<CaptureHandle>)> {
        self.restricted.restrict(id.clone());
        self.depart(id, now, ParticipationOutcome::Excluded)
    }

    /// Remove a participant from the live session, keeping their record
    fn depart(
        &mut self,
        id: &ParticipantId,
        now: DateTime<Utc>,
        outcome: ParticipationOutcome,
    ) -> Option<(ParticipantRecord, Option<CaptureHandle>)> {
        let mut monitor = self.monitors.remove(id)?;
        let handle = monitor.take_capture();
        let record = monitor.into_record(now, outcome);
        self.departed.push(record.clone());
        self.drafts.clear_participant(id);
        self.presence.remove_participant(id);
        Some((record, handle))
    }
}

/// Coordinator for the single system-wide review session
#[derive(Debug)]
pub struct SessionCoordinator {
    inner: Mutex<CoordinatorState>,
    capture: Arc<dyn CaptureProvider>,
    notifier: Arc<dyn NotificationSink>,
    bus: SignalBus,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl SessionCoordinator {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Mutex::new(CoordinatorState::default()),
            capture,
            notifier,
            bus: SignalBus::new(settings.broadcast_capacity),
            clock,
            settings,
        }
    }

    /// Rebuild from a snapshot. Live participants are not restored; they
    /// have to join again.
    pub fn restore(
        snapshot: SessionSnapshot,
        capture: Arc<dyn CaptureProvider>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        let coordinator = Self::new(capture, notifier, clock, settings);
        {
            let mut state = coordinator.inner.lock();
            state.session_id = snapshot.session.active.then(Ulid::new);
            state.session = snapshot.session;
            state.paper_ids = snapshot.paper_ids;
            state.opened_by = snapshot.opened_by;
            state.scheduled_by = snapshot.scheduled_by;
            state.restricted = snapshot.restricted;
            state.comments = CommentStore::from(snapshot.comments);
            state.annotations = snapshot.annotations;
            state.archive = snapshot.archive;
        }
        coordinator
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            session: state.session.clone(),
            paper_ids: state.paper_ids.clone(),
            opened_by: state.opened_by.clone(),
            scheduled_by: state.scheduled_by.clone(),
            restricted: state.restricted.clone(),
            comments: state.comments.entries().clone(),
            annotations: state.annotations.clone(),
            archive: state.archive.clone(),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Open the session for the given papers
    pub fn open_session(
        &self,
        actor: &Actor,
        paper_ids: Vec<PaperId>,
        minutes: u32,
    ) -> Result<ReviewSession, SessionError> {
        if !actor.has_role(Role::FinalAuthority) {
            debug!(actor = %actor.participant_id, "open_session rejected: not final authority");
            return Err(SessionError::GuardRejected("open_session".into()));
        }
        if minutes == 0 {
            return Err(SessionError::InvalidDuration("session must last at least one minute".into()));
        }
        let now = self.clock.now();
        let mut state = self.inner.lock();
        if state.session.active {
            return Err(SessionError::AlreadyInState);
        }
        state.session.activate(now, minutes);
        state.session_id = Some(Ulid::new());
        state.paper_ids = paper_ids;
        state.opened_by = Some(actor.participant_id.clone());
        state.scheduled_by = None;
        state.departed.clear();
        state.comments = CommentStore::default();
        state.presence = PresenceBoard::default();
        state.drafts = DraftBoard::default();
        state.annotations.clear();
        info!(
            opened_by = %actor.participant_id,
            minutes,
            papers = state.paper_ids.len(),
            "review session opened"
        );
        Ok(state.session.clone())
    }

    /// Record a future start and end for the session
    pub fn schedule_session(
        &self,
        actor: &Actor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !actor.has_role(Role::FinalAuthority) {
            debug!(actor = %actor.participant_id, "schedule_session rejected: not final authority");
            return Err(SessionError::GuardRejected("schedule_session".into()));
        }
        if end <= start {
            return Err(SessionError::InvalidDuration("scheduled end must follow start".into()));
        }
        let mut state = self.inner.lock();
        state.session.scheduled_start = Some(start);
        state.session.scheduled_end = Some(end);
        state.scheduled_by = Some(actor.clone());
        info!(%start, %end, "review session scheduled");
        Ok(())
    }

    /// A scheduled start that has come due.
    ///
    /// Returns the scheduling actor and the remaining length in minutes.
    /// The schedule stays pending until a session actually opens, so a
    /// start the workflow is not ready for is offered again later. A
    /// schedule whose end has already passed is dropped.
    pub fn due_schedule(&self) -> Option<(Actor, u32)> {
        let now = self.clock.now();
        let mut state = self.inner.lock();
        if !state.session.schedule_due(now) {
            return None;
        }
        let actor = state.scheduled_by.clone()?;
        let end = state.session.scheduled_end?;
        if end <= now {
            warn!(%end, "scheduled session dropped: its end has passed");
            state.session.scheduled_start = None;
            state.session.scheduled_end = None;
            state.scheduled_by = None;
            return None;
        }
        let minutes = u32::try_from((end - now).num_minutes().max(1)).unwrap_or(u32::MAX);
        Some((actor, minutes))
    }

    /// Close the active session. Idempotent; only the first close produces
    /// a record.
    pub async fn close_session(&self, reason: CloseReason) -> Option<SessionRecord> {
        let now = self.clock.now();
        let (record, handles) = {
            let mut state = self.inner.lock();
            if !state.session.active {
                debug!(?reason, "close ignored: no active session");
                return None;
            }
            state.session.deactivate(reason);

            let mut handles = Vec::new();
            let mut participants = std::mem::take(&mut state.departed);
            let monitors = std::mem::take(&mut state.monitors);
            for (_, mut monitor) in monitors {
                if let Some(handle) = monitor.take_capture() {
                    handles.push(handle);
                }
                participants.push(monitor.into_record(now, ParticipationOutcome::PresentAtClose));
            }
            state.pending_joins.clear();
            state.presence = PresenceBoard::default();
            state.drafts = DraftBoard::default();

            let started_at = state.session.started_at.unwrap_or(now);
            let record = SessionRecord {
                id: state.session_id.take().unwrap_or_else(Ulid::new),
                paper_ids: state.paper_ids.clone(),
                started_at,
                completed_at: now,
                duration_minutes: state.session.duration_minutes.unwrap_or_default(),
                participants,
                comments: std::mem::take(&mut state.comments).into_entries(),
                annotations: std::mem::take(&mut state.annotations),
                status: reason.status(),
            };
            state.archive.push(record.clone());
            (record, handles)
        };

        for handle in handles {
            let participant = handle.participant_id.clone();
            if let Err(e) = self.capture.release(handle).await {
                warn!(%participant, error = %e, "capture release failed during close");
            }
        }
        self.bus.publish(SessionSignal::SessionClosed {
            status: record.status,
            at: now,
        });
        info!(
            session = %record.id,
            status = ?record.status,
            participants = record.participants.len(),
            comments = record.comments.len(),
            "review session closed"
        );
        Some(record)
    }

    /// Close if the countdown has lapsed. Returns `true` if the session is
    /// now closed because of expiry.
    async fn expire_if_due(&self) -> bool {
        let now = self.clock.now();
        let expired = self.inner.lock().session.is_expired(now);
        if expired {
            let _ = self.close_session(CloseReason::Expired).await;
        }
        expired
    }

    // ---------------------------------------------------------------------
    // Participation
    // ---------------------------------------------------------------------

    /// Join the active session.
    ///
    /// Non-authority participants must acquire the capture device first; a
    /// refusal aborts the join with nothing mutated. The final authority
    /// joins without enforcement.
    pub async fn join(&self, actor: &Actor) -> Result<JoinReceipt, SessionError> {
        let id = actor.participant_id.clone();
        let enforced = !actor.has_role(Role::FinalAuthority);

        let precheck = {
            let mut state = self.inner.lock();
            let now = self.clock.now();
            let result = state.admission(&id, now).and_then(|()| {
                if state.pending_joins.contains(&id) {
                    Err(SessionError::AlreadyInState)
                } else {
                    Ok(())
                }
            });
            if result.is_ok() {
                state.pending_joins.insert(id.clone());
            }
            result
        };
        if let Err(e) = precheck {
            return Err(self.admission_failed(&id, e).await);
        }

        let handle = if enforced {
            match self.capture.acquire(&id).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    self.inner.lock().pending_joins.remove(&id);
                    warn!(participant = %id, error = %e, "join aborted: capture refused");
                    return Err(SessionError::PermissionDenied {
                        participant: id,
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            None
        };

        let admitted = {
            let mut state = self.inner.lock();
            state.pending_joins.remove(&id);
            let now = self.clock.now();
            match state.admission(&id, now) {
                Ok(()) => {
                    let monitor = if enforced {
                        ParticipantMonitor::new(
                            id.clone(),
                            actor.display_name.clone(),
                            now,
                            handle.clone(),
                            self.settings.warning_capacity,
                        )
                    } else {
                        ParticipantMonitor::unenforced(
                            id.clone(),
                            actor.display_name.clone(),
                            now,
                            self.settings.warning_capacity,
                        )
                    };
                    // a rejoin after reactivation keeps the earlier warnings
                    let monitor = match state.departed.iter().rposition(|r| r.participant_id == id) {
                        Some(i) => monitor.with_history(state.departed.remove(i)),
                        None => monitor,
                    };
                    state.monitors.insert(id.clone(), monitor);
                    Ok(JoinReceipt {
                        participant_id: id.clone(),
                        joined_at: now,
                        enforced,
                        policy: if enforced {
                            state.session.policy_flags
                        } else {
                            PolicyFlags::default()
                        },
                        expires_at: state.session.expires_at,
                    })
                }
                Err(e) => Err(e),
            }
        };

        match admitted {
            Ok(receipt) => {
                self.bus.publish(SessionSignal::ParticipantJoined {
                    participant_id: id.clone(),
                    enforced,
                });
                info!(participant = %id, enforced, "participant joined");
                Ok(receipt)
            }
            Err(e) => {
                // state changed while the device was being acquired
                if let Some(handle) = handle {
                    if let Err(release_err) = self.capture.release(handle).await {
                        warn!(participant = %id, error = %release_err, "capture release failed");
                    }
                }
                Err(self.admission_failed(&id, e).await)
            }
        }
    }

    async fn admission_failed(&self, id: &ParticipantId, error: SessionError) -> SessionError {
        match &error {
            SessionError::ExpiredSession => {
                let _ = self.close_session(CloseReason::Expired).await;
            }
            SessionError::Restricted(_) => {
                self.notifier.notify(
                    id,
                    "Access restricted",
                    "You were removed from this session. Ask the final authority to reactivate you.",
                    NoticeLevel::Warning,
                );
            }
            _ => {}
        }
        debug!(participant = %id, %error, "join refused");
        error
    }

    /// Leave voluntarily; the participant's record is kept
    pub async fn leave(&self, id: &ParticipantId) -> Result<ParticipantRecord, SessionError> {
        self.depart(id, ParticipationOutcome::Left).await
    }

    /// Mark a participant's review as finished
    pub async fn complete_participation(
        &self,
        id: &ParticipantId,
    ) -> Result<ParticipantRecord, SessionError> {
        self.depart(id, ParticipationOutcome::Completed).await
    }

    async fn depart(
        &self,
        id: &ParticipantId,
        outcome: ParticipationOutcome,
    ) -> Result<ParticipantRecord, SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        let (record, handle) = {
            let mut state = self.inner.lock();
            state.joined(id, now)?;
            state
                .depart(id, now, outcome)
                .ok_or_else(|| SessionError::NotJoined(id.clone()))?
        };
        if let Some(handle) = handle {
            if let Err(e) = self.capture.release(handle).await {
                warn!(participant = %id, error = %e, "capture release failed");
            }
        }
        info!(participant = %id, ?outcome, "participant left session");
        Ok(record)
    }

    // ---------------------------------------------------------------------
    // Monitoring
    // ---------------------------------------------------------------------

    /// Feed one client signal into the participant's monitor
    pub async fn report_signal(
        &self,
        id: &ParticipantId,
        kind: ViolationKind,
    ) -> Result<SignalVerdict, SessionError> {
        let now = self.clock.now();
        let ingested = {
            let mut state = self.inner.lock();
            let joined = state.joined(id, now).map(|_| ());
            let verdict = joined.and_then(|()| {
                state
                    .monitors
                    .get_mut(id)
                    .map(|m| m.ingest(kind, now))
                    .ok_or_else(|| SessionError::NotJoined(id.clone()))
            });
            match verdict {
                Ok(verdict) => {
                    // restrict under the same lock that recorded the warning
                    let handle = if verdict.escalates() {
                        state.exclude(id, now).and_then(|(_, handle)| handle)
                    } else {
                        None
                    };
                    Ok((verdict, handle, state.opened_by.clone()))
                }
                Err(e) => Err(e),
            }
        };
        let (verdict, excluded, opener) = match ingested {
            Ok(v) => v,
            Err(SessionError::ExpiredSession) => {
                let _ = self.close_session(CloseReason::Expired).await;
                return Err(SessionError::ExpiredSession);
            }
            Err(e) => return Err(e),
        };

        match &verdict {
            SignalVerdict::Escalate(warning) => {
                self.announce_exclusion(id, warning, excluded, opener)
                    .await;
            }
            SignalVerdict::Recorded(warning) | SignalVerdict::GraceArmed(warning) => {
                self.notifier
                    .notify(id, "Warning", &warning.message, NoticeLevel::Warning);
                debug!(participant = %id, kind = ?warning.kind, "violation warning recorded");
            }
            SignalVerdict::Ignored => {}
        }
        Ok(verdict)
    }

    /// Participant's review window has focus again
    pub async fn focus_regained(&self, id: &ParticipantId) -> Result<bool, SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        let mut state = self.inner.lock();
        state.joined(id, now)?;
        let monitor = state
            .monitors
            .get_mut(id)
            .ok_or_else(|| SessionError::NotJoined(id.clone()))?;
        Ok(monitor.focus_regained())
    }

    /// Side effects of an exclusion already applied under the lock
    async fn announce_exclusion(
        &self,
        id: &ParticipantId,
        warning: &Warning,
        handle: Option<CaptureHandle>,
        opener: Option<ParticipantId>,
    ) {
        if let Some(handle) = handle {
            if let Err(e) = self.capture.release(handle).await {
                warn!(participant = %id, error = %e, "capture release failed");
            }
        }

        warn!(participant = %id, kind = ?warning.kind, "participant excluded for critical violation");
        self.notifier.notify(
            id,
            "Removed from session",
            &format!("{}. You have been removed from the session.", warning.message),
            NoticeLevel::Critical,
        );
        if let Some(opener) = opener {
            self.notifier.notify(
                &opener,
                "Participant excluded",
                &format!("{id} was removed: {}", warning.message),
                NoticeLevel::Critical,
            );
        }
        self.bus.publish(SessionSignal::ParticipantExcluded {
            participant_id: id.clone(),
            kind: warning.kind,
        });
    }

    /// Lift a restriction. Prior warnings stay on record.
    pub fn reactivate(&self, actor: &Actor, id: &ParticipantId) -> Result<(), SessionError> {
        if !actor.has_role(Role::FinalAuthority) {
            debug!(actor = %actor.participant_id, "reactivate rejected: not final authority");
            return Err(SessionError::GuardRejected("reactivate".into()));
        }
        let mut state = self.inner.lock();
        if !state.restricted.reactivate(id) {
            return Err(SessionError::AlreadyInState);
        }
        info!(participant = %id, by = %actor.participant_id, "participant reactivated");
        Ok(())
    }

    /// Periodic housekeeping: session expiry, focus grace re-checks and
    /// presence pruning
    pub async fn poll(&self) -> PollReport {
        let now = self.clock.now();
        let mut report = PollReport::default();
        let (expired, excluded, opener) = {
            let mut state = self.inner.lock();
            if !state.session.active {
                return report;
            }
            report.presence_pruned = state.presence.prune(now);
            if state.session.is_expired(now) {
                (true, Vec::new(), None)
            } else {
                let grace = self.settings.focus_grace;
                let confirmed: Vec<(ParticipantId, Warning)> = state
                    .monitors
                    .iter_mut()
                    .filter_map(|(id, m)| m.check_grace(now, grace).map(|w| (id.clone(), w)))
                    .collect();
                let excluded: Vec<_> = confirmed
                    .into_iter()
                    .map(|(id, warning)| {
                        let handle = state.exclude(&id, now).and_then(|(_, handle)| handle);
                        (id, warning, handle)
                    })
                    .collect();
                (false, excluded, state.opened_by.clone())
            }
        };

        if expired {
            report.closed = self.close_session(CloseReason::Expired).await;
            return report;
        }
        for (id, warning, handle) in excluded {
            self.announce_exclusion(&id, &warning, handle, opener.clone())
                .await;
            report.escalated.push(id);
        }
        report
    }

    // ---------------------------------------------------------------------
    // Comments
    // ---------------------------------------------------------------------

    /// Commit a comment for a section.
    ///
    /// Returns `false` when a later write already holds the section.
    pub async fn save_comment(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: impl Into<String>,
        color_tag: Option<String>,
        written_at: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        let applied = {
            let mut state = self.inner.lock();
            let author_name = state.joined(id, now)?.display_name().to_string();
            let applied = state.comments.save(
                section_key,
                CommentEntry {
                    text: text.into(),
                    author_id: id.clone(),
                    author_name,
                    timestamp: written_at,
                    color_tag,
                },
            );
            state.drafts.clear(section_key, id);
            state.presence.remove(section_key, id);
            applied
        };
        if applied {
            self.bus.publish(SessionSignal::CommentSaved {
                section_key: section_key.to_string(),
                author_id: id.clone(),
                timestamp: written_at,
            });
        } else {
            debug!(participant = %id, section_key, "comment superseded by a later write");
        }
        Ok(applied)
    }

    /// Update a live draft and refresh the typing indicator
    pub async fn update_draft(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        let text = text.into();
        let display_name = {
            let mut state = self.inner.lock();
            let name = state.joined(id, now)?.display_name().to_string();
            state.drafts.set(section_key, id, text.clone());
            state
                .presence
                .touch(section_key, id, &name, now, self.settings.presence_ttl);
            name
        };
        self.bus.publish(SessionSignal::Typing {
            section_key: section_key.to_string(),
            participant_id: id.clone(),
            display_name,
        });
        self.bus.publish(SessionSignal::Draft {
            section_key: section_key.to_string(),
            participant_id: id.clone(),
            text,
        });
        Ok(())
    }

    /// Discard a draft when the editor loses focus
    pub async fn blur(&self, id: &ParticipantId, section_key: &str) -> Result<(), SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        {
            let mut state = self.inner.lock();
            state.joined(id, now)?;
            state.drafts.clear(section_key, id);
            state.presence.remove(section_key, id);
        }
        self.bus.publish(SessionSignal::DraftCleared {
            section_key: section_key.to_string(),
            participant_id: id.clone(),
        });
        Ok(())
    }

    /// Attach a note to a section; archived with the session
    pub async fn annotate(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: impl Into<String>,
    ) -> Result<Annotation, SessionError> {
        if self.expire_if_due().await {
            return Err(SessionError::ExpiredSession);
        }
        let now = self.clock.now();
        let mut state = self.inner.lock();
        state.joined(id, now)?;
        let annotation = Annotation {
            id: Ulid::new(),
            section_key: section_key.to_string(),
            participant_id: id.clone(),
            text: text.into(),
            created_at: now,
        };
        state.annotations.push(annotation.clone());
        Ok(annotation)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn session(&self) -> ReviewSession {
        self.inner.lock().session.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().session.active
    }

    pub fn paper_ids(&self) -> Vec<PaperId> {
        self.inner.lock().paper_ids.clone()
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        self.inner.lock().monitors.values().map(ParticipantView::from).collect()
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<ParticipantView> {
        self.inner.lock().monitors.get(id).map(ParticipantView::from)
    }

    pub fn is_joined(&self, id: &ParticipantId) -> bool {
        self.inner.lock().monitors.contains_key(id)
    }

    /// Retained warnings for a participant, live or departed in this session
    pub fn warnings_for(&self, id: &ParticipantId) -> Vec<Warning> {
        let state = self.inner.lock();
        if let Some(m) = state.monitors.get(id) {
            return m.warnings().to_vec();
        }
        state
            .departed
            .iter()
            .rev()
            .find(|r| &r.participant_id == id)
            .map(|r| r.warnings.clone())
            .unwrap_or_default()
    }

    pub fn restricted(&self) -> RestrictedSet {
        self.inner.lock().restricted.clone()
    }

    pub fn comments(&self) -> BTreeMap<String, CommentEntry> {
        self.inner.lock().comments.entries().clone()
    }

    pub fn typing(&self, section_key: &str) -> Vec<TypingPresence> {
        let now = self.clock.now();
        self.inner.lock().presence.typing(section_key, now)
    }

    pub fn drafts(&self, section_key: &str) -> BTreeMap<ParticipantId, String> {
        self.inner.lock().drafts.drafts(section_key)
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.inner.lock().annotations.clone()
    }

    /// Closed session records, oldest first
    pub fn archive(&self) -> Vec<SessionRecord> {
        self.inner.lock().archive.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.bus.subscribe()
    }
}
