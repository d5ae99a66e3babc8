//! Vetting service
//!
//! Couples the workflow engine with the session coordinator. Opening a
//! session begins review; closing one concludes it and advances paper
//! statuses. Every durable mutation is saved through the [`StateStore`].
//!
//! Lock order: the workflow mutex may be held while calling into the
//! coordinator, never the other way round. The coordinator's own lock is
//! internal and is never held across calls.

use crate::config::VettingConfig;
use crate::error::VettingError;
use crate::persistence::{StatePatch, StateStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use vetting_session::{
    Annotation, CaptureProvider, CloseReason, CommentEntry, JoinReceipt, NotificationSink, ParticipantRecord,
    ParticipantView, PollReport, RestrictedSet, ReviewSession, SessionCoordinator, SessionError,
    SessionRecord, SessionSignal, SessionStatus, SignalVerdict, TypingPresence, ViolationKind, Warning,
};
use vetting_workflow::state_machine::check;
use vetting_workflow::{
    Actor, Clock, DeadlineDuration, Deadlines, DestructionLogEntry, GuardRejection, Operation, Paper,
    PaperDraft, ParticipantId, RevisionLedgerEntry, Role, Stage, TimelineEvent, TransitionOutcome,
    WindowKind, WorkflowEngine, WorkflowSnapshot,
};

/// External collaborators the service is wired to
#[derive(Debug, Clone)]
pub struct ServiceDeps {
    pub clock: Arc<dyn Clock>,
    pub capture: Arc<dyn CaptureProvider>,
    pub notifier: Arc<dyn NotificationSink>,
    pub store: Arc<dyn StateStore>,
}

/// What one [`VettingService::tick`] did
#[derive(Debug, Default)]
pub struct TickReport {
    pub deadline: Option<TimelineEvent>,
    pub poll: PollReport,
    pub concluded: Option<TransitionOutcome>,
    pub scheduled_start: Option<TransitionOutcome>,
}

#[derive(Debug)]
pub struct VettingService {
    config: VettingConfig,
    workflow: Mutex<WorkflowEngine>,
    sessions: SessionCoordinator,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl VettingService {
    /// Fresh service at revision 1 with nothing persisted yet
    pub fn new(config: VettingConfig, deps: ServiceDeps) -> Self {
        let workflow = WorkflowEngine::new(deps.clock.clone(), config.deadlines);
        let sessions = SessionCoordinator::new(
            deps.capture,
            deps.notifier,
            deps.clock.clone(),
            config.coordinator_settings(),
        );
        Self {
            config,
            workflow: Mutex::new(workflow),
            sessions,
            store: deps.store,
            clock: deps.clock,
        }
    }

    /// Restore from the store, or start fresh if it is empty
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or the saved timeline does not
    /// verify.
    pub async fn open(config: VettingConfig, deps: ServiceDeps) -> Result<Self, VettingError> {
        let persisted = deps.store.load().await?;
        let restored = !persisted.is_empty();
        let settings = config.coordinator_settings();

        let workflow = match persisted.workflow {
            Some(snapshot) => WorkflowEngine::restore(snapshot, deps.clock.clone())?,
            None => WorkflowEngine::new(deps.clock.clone(), config.deadlines),
        };
        let sessions = match persisted.session {
            Some(snapshot) => SessionCoordinator::restore(
                snapshot,
                deps.capture,
                deps.notifier,
                deps.clock.clone(),
                settings,
            ),
            None => SessionCoordinator::new(deps.capture, deps.notifier, deps.clock.clone(), settings),
        };
        info!(
            restored,
            stage = %workflow.stage(),
            effective = %workflow.effective_stage(),
            revision = workflow.state().current_revision(),
            "vetting service ready"
        );
        Ok(Self {
            config,
            workflow: Mutex::new(workflow),
            sessions,
            store: deps.store,
            clock: deps.clock,
        })
    }

    pub fn config(&self) -> &VettingConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Direct access to the coordinator for read-only callers
    pub fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    // ---------------------------------------------------------------------
    // Workflow
    // ---------------------------------------------------------------------

    async fn apply<F>(&self, f: F) -> Result<TransitionOutcome, VettingError>
    where
        F: FnOnce(&mut WorkflowEngine) -> TransitionOutcome + Send,
    {
        let mut engine = self.workflow.lock().await;
        let outcome = f(&mut engine);
        if outcome.is_applied() {
            self.store.save(StatePatch::Workflow(engine.snapshot())).await?;
        }
        Ok(outcome)
    }

    pub async fn submit_paper(
        &self,
        actor: &Actor,
        draft: PaperDraft,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.submit_paper(actor, draft)).await
    }

    pub async fn compile_for_review(
        &self,
        actor: &Actor,
        notes: &str,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.compile_for_review(actor, notes)).await
    }

    pub async fn return_to_compiler(
        &self,
        actor: &Actor,
        notes: &str,
        deadline: DeadlineDuration,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.return_to_compiler(actor, notes, deadline)).await
    }

    pub async fn sanitize_feedback(
        &self,
        actor: &Actor,
        notes: &str,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.sanitize_feedback(actor, notes)).await
    }

    pub async fn complete_revision(
        &self,
        actor: &Actor,
        notes: &str,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.complete_revision(actor, notes)).await
    }

    pub async fn forward_for_approval(&self, actor: &Actor) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.forward_for_approval(actor)).await
    }

    pub async fn approve(&self, actor: &Actor, notes: &str) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.approve(actor, notes)).await
    }

    pub async fn reject(&self, actor: &Actor, notes: &str) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.reject(actor, notes)).await
    }

    pub async fn restart_cycle(&self, actor: &Actor) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.restart_cycle(actor)).await
    }

    pub async fn start_author_window(&self, actor: &Actor) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.start_author_window(actor)).await
    }

    pub async fn set_window(
        &self,
        actor: &Actor,
        kind: WindowKind,
        active: bool,
        duration: Option<DeadlineDuration>,
    ) -> Result<TransitionOutcome, VettingError> {
        self.apply(|e| e.set_window(actor, kind, active, duration)).await
    }

    // ---------------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------------

    /// Open the review session and move the workflow into review.
    ///
    /// `minutes` falls back to the configured default.
    ///
    /// # Errors
    ///
    /// Fails on an unusable duration or a store failure. Guard failures
    /// come back as `TransitionOutcome::Ignored`.
    pub async fn open_session(
        &self,
        actor: &Actor,
        minutes: Option<u32>,
    ) -> Result<TransitionOutcome, VettingError> {
        let mut engine = self.workflow.lock().await;
        if let Err(rejection) = check(Operation::BeginReview, actor, engine.stage()) {
            debug!(actor = %actor.participant_id, stage = %engine.stage(), %rejection, "open_session ignored");
            return Ok(rejection.into());
        }
        let minutes = minutes.unwrap_or(self.config.default_session_minutes);
        match self.sessions.open_session(actor, engine.paper_ids(), minutes) {
            Ok(_) => {}
            Err(SessionError::AlreadyInState) => return Ok(GuardRejection::AlreadyInState.into()),
            Err(SessionError::GuardRejected(_)) => return Ok(GuardRejection::WrongRole.into()),
            Err(e) => return Err(e.into()),
        }
        let outcome = engine.begin_review(actor);
        self.store.save(StatePatch::Workflow(engine.snapshot())).await?;
        drop(engine);
        self.persist_session().await?;
        Ok(outcome)
    }

    /// Schedule a future session; a later [`tick`](Self::tick) opens it
    ///
    /// # Errors
    ///
    /// Fails when `end` does not follow `start` or the store fails.
    pub async fn schedule_session(
        &self,
        actor: &Actor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), VettingError> {
        match self.sessions.schedule_session(actor, start, end) {
            Err(e) if e.is_noop() => Ok(()),
            Err(e) => Err(e.into()),
            Ok(()) => self.persist_session().await,
        }
    }

    /// Final authority ends the session early
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn end_session(&self, actor: &Actor) -> Result<Option<SessionRecord>, VettingError> {
        self.close_by_authority(actor, CloseReason::EndedByAuthority).await
    }

    /// Final authority finishes the review
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn complete_review(&self, actor: &Actor) -> Result<Option<SessionRecord>, VettingError> {
        self.close_by_authority(actor, CloseReason::ReviewCompleted).await
    }

    async fn close_by_authority(
        &self,
        actor: &Actor,
        reason: CloseReason,
    ) -> Result<Option<SessionRecord>, VettingError> {
        if !actor.has_role(Role::FinalAuthority) {
            debug!(actor = %actor.participant_id, ?reason, "close ignored: not final authority");
            return Ok(None);
        }
        self.finish(reason).await
    }

    async fn finish(&self, reason: CloseReason) -> Result<Option<SessionRecord>, VettingError> {
        let record = self.sessions.close_session(reason).await;
        if record.is_some() {
            self.conclude(reason.is_expiry()).await?;
            self.persist_session().await?;
        }
        Ok(record)
    }

    async fn conclude(&self, expired: bool) -> Result<TransitionOutcome, VettingError> {
        let system = Actor::system();
        self.apply(|e| e.conclude_review(&system, expired)).await
    }

    async fn persist_session(&self) -> Result<(), VettingError> {
        self.store
            .save(StatePatch::Session(self.sessions.snapshot()))
            .await?;
        Ok(())
    }

    /// Reconcile after a coordinator call. A lapse that closed the session
    /// concludes the review as expired.
    async fn settle<T>(&self, result: Result<T, SessionError>, durable: bool) -> Result<T, VettingError> {
        let expired =
            matches!(result, Err(SessionError::ExpiredSession)) && !self.sessions.is_active();
        if expired {
            self.conclude(true).await?;
        }
        if durable || expired {
            self.persist_session().await?;
        }
        result.map_err(VettingError::from)
    }

    /// Deadline cascade, session housekeeping and scheduled starts
    ///
    /// # Errors
    ///
    /// Fails only on store failure.
    pub async fn tick(&self) -> Result<TickReport, VettingError> {
        let mut report = TickReport::default();
        {
            let mut engine = self.workflow.lock().await;
            report.deadline = engine.tick();
            if report.deadline.is_some() {
                self.store.save(StatePatch::Workflow(engine.snapshot())).await?;
            }
        }

        report.poll = self.sessions.poll().await;
        if let Some(record) = &report.poll.closed {
            report.concluded = Some(self.conclude(record.status == SessionStatus::Expired).await?);
        }
        if report.poll.closed.is_some() || !report.poll.escalated.is_empty() {
            self.persist_session().await?;
        }

        let pending = self.sessions.session().scheduled_start.is_some();
        match self.sessions.due_schedule() {
            Some((actor, minutes)) => {
                info!(by = %actor.participant_id, minutes, "starting scheduled session");
                let outcome = self.open_session(&actor, Some(minutes)).await?;
                if let Some(rejection) = outcome.rejection() {
                    debug!(%rejection, "scheduled session not opened yet; kept pending");
                }
                report.scheduled_start = Some(outcome);
            }
            None if pending && self.sessions.session().scheduled_start.is_none() => {
                self.persist_session().await?;
            }
            None => {}
        }
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Participants
    // ---------------------------------------------------------------------

    pub async fn join(&self, actor: &Actor) -> Result<JoinReceipt, VettingError> {
        let result = self.sessions.join(actor).await;
        self.settle(result, false).await
    }

    pub async fn leave(&self, id: &ParticipantId) -> Result<ParticipantRecord, VettingError> {
        let result = self.sessions.leave(id).await;
        self.settle(result, false).await
    }

    pub async fn complete_participation(
        &self,
        id: &ParticipantId,
    ) -> Result<ParticipantRecord, VettingError> {
        let result = self.sessions.complete_participation(id).await;
        self.settle(result, false).await
    }

    pub async fn report_signal(
        &self,
        id: &ParticipantId,
        kind: ViolationKind,
    ) -> Result<SignalVerdict, VettingError> {
        let result = self.sessions.report_signal(id, kind).await;
        let durable = matches!(&result, Ok(v) if v.escalates());
        self.settle(result, durable).await
    }

    pub async fn focus_regained(&self, id: &ParticipantId) -> Result<bool, VettingError> {
        let result = self.sessions.focus_regained(id).await;
        self.settle(result, false).await
    }

    pub async fn reactivate(&self, actor: &Actor, id: &ParticipantId) -> Result<(), VettingError> {
        let result = self.sessions.reactivate(actor, id);
        self.settle(result, true).await
    }

    pub async fn save_comment(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: &str,
        color_tag: Option<String>,
        written_at: DateTime<Utc>,
    ) -> Result<bool, VettingError> {
        let result = self
            .sessions
            .save_comment(id, section_key, text, color_tag, written_at)
            .await;
        self.settle(result, true).await
    }

    pub async fn update_draft(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: &str,
    ) -> Result<(), VettingError> {
        let result = self.sessions.update_draft(id, section_key, text).await;
        self.settle(result, false).await
    }

    pub async fn blur(&self, id: &ParticipantId, section_key: &str) -> Result<(), VettingError> {
        let result = self.sessions.blur(id, section_key).await;
        self.settle(result, false).await
    }

    pub async fn annotate(
        &self,
        id: &ParticipantId,
        section_key: &str,
        text: &str,
    ) -> Result<Annotation, VettingError> {
        let result = self.sessions.annotate(id, section_key, text).await;
        self.settle(result, true).await
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn stage(&self) -> Stage {
        self.workflow.lock().await.stage()
    }

    /// Stage reconciled with persisted paper statuses
    pub async fn effective_stage(&self) -> Stage {
        self.workflow.lock().await.effective_stage()
    }

    pub async fn current_revision(&self) -> u32 {
        self.workflow.lock().await.state().current_revision()
    }

    /// Newest first
    pub async fn timeline(&self) -> Vec<TimelineEvent> {
        self.workflow.lock().await.timeline()
    }

    pub async fn ledger(&self) -> Vec<RevisionLedgerEntry> {
        self.workflow.lock().await.ledger().entries().to_vec()
    }

    pub async fn destruction_log(&self) -> Vec<DestructionLogEntry> {
        self.workflow.lock().await.destruction_log().to_vec()
    }

    pub async fn deadlines(&self) -> Deadlines {
        self.workflow.lock().await.deadlines().clone()
    }

    pub async fn papers(&self) -> Vec<Paper> {
        self.workflow.lock().await.papers().to_vec()
    }

    pub async fn workflow_snapshot(&self) -> WorkflowSnapshot {
        self.workflow.lock().await.snapshot()
    }

    pub fn session(&self) -> ReviewSession {
        self.sessions.session()
    }

    pub fn participants(&self) -> Vec<ParticipantView> {
        self.sessions.participants()
    }

    pub fn restricted(&self) -> RestrictedSet {
        self.sessions.restricted()
    }

    pub fn archive(&self) -> Vec<SessionRecord> {
        self.sessions.archive()
    }

    pub fn comments(&self) -> BTreeMap<String, CommentEntry> {
        self.sessions.comments()
    }

    pub fn typing(&self, section_key: &str) -> Vec<TypingPresence> {
        self.sessions.typing(section_key)
    }

    pub fn drafts(&self, section_key: &str) -> BTreeMap<ParticipantId, String> {
        self.sessions.drafts(section_key)
    }

    pub fn warnings_for(&self, id: &ParticipantId) -> Vec<Warning> {
        self.sessions.warnings_for(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.sessions.subscribe()
    }
}
