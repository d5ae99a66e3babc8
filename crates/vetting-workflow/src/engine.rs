//! Workflow engine
//!
//! Owns the workflow state for one paper cycle and is the only writer of it.
//! Every public transition is guarded: a failed guard is a silent no-op
//! (logged at debug level), so duplicate clicks stay idempotent.
//!
//! A successful transition:
//! 1. appends a [`TimelineEvent`]
//! 2. may update `portal_open`, `awaiting_recycle` and `last_decision`
//! 3. appends a [`crate::RevisionLedgerEntry`] when the paper content changed

use crate::clock::Clock;
use crate::deadline::{DeadlineDuration, DeadlinePlan, DeadlineTick, Deadlines, WindowKind};
use crate::error::WorkflowError;
use crate::ledger::{DestructionLogEntry, RevisionLedger};
use crate::paper::{derive_effective_stage, Paper, PaperDraft, PaperStatus};
use crate::state_machine::{self, can_transition, GuardRejection, Operation, Stage};
use crate::timeline::{Timeline, TimelineEvent};
use crate::types::{Actor, PaperId, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Most recent final-authority decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
    /// Sent back to the compiler after review
    Returned,
}

/// Mutable workflow state for one paper cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    stage: Stage,
    timeline: Timeline,
    current_revision: u32,
    portal_open: bool,
    awaiting_recycle: bool,
    last_decision: Option<Decision>,
}

impl WorkflowState {
    fn fresh() -> Self {
        Self {
            stage: Stage::AwaitingAuthor,
            timeline: Timeline::default(),
            current_revision: 1,
            portal_open: false,
            awaiting_recycle: false,
            last_decision: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[inline]
    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    #[inline]
    #[must_use]
    pub fn current_revision(&self) -> u32 {
        self.current_revision
    }

    #[inline]
    #[must_use]
    pub fn portal_open(&self) -> bool {
        self.portal_open
    }

    #[inline]
    #[must_use]
    pub fn awaiting_recycle(&self) -> bool {
        self.awaiting_recycle
    }

    #[inline]
    #[must_use]
    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }
}

/// Result of a guarded transition
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(TimelineEvent),
    Ignored(GuardRejection),
}

impl TransitionOutcome {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn event(&self) -> Option<&TimelineEvent> {
        match self {
            Self::Applied(event) => Some(event),
            Self::Ignored(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<GuardRejection> {
        match self {
            Self::Applied(_) => None,
            Self::Ignored(rejection) => Some(*rejection),
        }
    }
}

impl From<TimelineEvent> for TransitionOutcome {
    fn from(event: TimelineEvent) -> Self {
        Self::Applied(event)
    }
}

impl From<GuardRejection> for TransitionOutcome {
    fn from(rejection: GuardRejection) -> Self {
        Self::Ignored(rejection)
    }
}

/// Persisted form of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub ledger: RevisionLedger,
    pub destruction_log: Vec<DestructionLogEntry>,
    pub deadlines: Deadlines,
    pub papers: Vec<Paper>,
}

#[derive(Debug)]
pub struct WorkflowEngine {
    state: WorkflowState,
    ledger: RevisionLedger,
    destruction_log: Vec<DestructionLogEntry>,
    deadlines: Deadlines,
    papers: Vec<Paper>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    /// Open a new cycle at revision 1, recording `v1.1`
    pub fn new(clock: Arc<dyn Clock>, plan: DeadlinePlan) -> Self {
        let mut engine = Self {
            state: WorkflowState::fresh(),
            ledger: RevisionLedger::default(),
            destruction_log: Vec::new(),
            deadlines: Deadlines::from_plan(plan),
            papers: Vec::new(),
            clock,
        };
        let system = Actor::system();
        engine.record_revision(&system, "Vetting cycle opened");
        engine.commit(&system, Stage::AwaitingAuthor, "Vetting cycle opened for revision 1".into());
        engine
    }

    /// Rebuild an engine from a persisted snapshot
    ///
    /// # Errors
    /// - `WorkflowError::IntegrityViolation` if the timeline chain is broken
    /// - `WorkflowError::InvalidSnapshot` if the revision counter is zero
    pub fn restore(snapshot: WorkflowSnapshot, clock: Arc<dyn Clock>) -> Result<Self, WorkflowError> {
        snapshot.state.timeline.verify_integrity()?;
        if snapshot.state.current_revision == 0 {
            return Err(WorkflowError::InvalidSnapshot(
                "current revision must start at 1".to_string(),
            ));
        }
        Ok(Self {
            state: snapshot.state,
            ledger: snapshot.ledger,
            destruction_log: snapshot.destruction_log,
            deadlines: snapshot.deadlines,
            papers: snapshot.papers,
            clock,
        })
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state.clone(),
            ledger: self.ledger.clone(),
            destruction_log: self.destruction_log.clone(),
            deadlines: self.deadlines.clone(),
            papers: self.papers.clone(),
        }
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    /// Stored stage reconciled with paper statuses; recomputed on every call
    pub fn effective_stage(&self) -> Stage {
        derive_effective_stage(&self.papers, self.state.stage)
    }

    #[inline]
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Timeline events, newest first
    pub fn timeline(&self) -> Vec<TimelineEvent> {
        self.state.timeline.events()
    }

    #[inline]
    pub fn ledger(&self) -> &RevisionLedger {
        &self.ledger
    }

    #[inline]
    pub fn destruction_log(&self) -> &[DestructionLogEntry] {
        &self.destruction_log
    }

    #[inline]
    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    #[inline]
    pub fn papers(&self) -> &[Paper] {
        &self.papers
    }

    pub fn paper_ids(&self) -> Vec<PaperId> {
        self.papers.iter().map(|p| p.id).collect()
    }

    /// Author (or compiler on the author's behalf) hands in a paper
    pub fn submit_paper(&mut self, actor: &Actor, draft: PaperDraft) -> TransitionOutcome {
        let op = Operation::SubmitPaper;
        if let Err(rejection) = self.guard(op, actor) {
            return rejection.into();
        }
        let from = self.state.stage;
        let role = actor
            .roles()
            .find(|role| can_transition(*role, from, op))
            .unwrap_or(Role::Author);
        let paper = Paper {
            id: PaperId::new(),
            title: draft.title,
            content_ref: draft.content_ref,
            status: PaperStatus::Submitted,
            submitted_by_role: role,
            submitted_by: actor.participant_id.clone(),
            submitted_at: self.clock.now(),
        };
        let message = format!("{} submitted \"{}\" as {}", actor.display_name, paper.title, role);
        self.papers.push(paper);
        if from == Stage::AwaitingAuthor {
            self.deadlines.author.stop();
        }
        self.record_revision(actor, &message);
        self.commit(actor, Stage::SubmittedToCompiler, message).into()
    }

    pub fn compile_for_review(&mut self, actor: &Actor, notes: &str) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::CompileForReview, actor) {
            return rejection.into();
        }
        if self.papers.is_empty() {
            debug!(actor = %actor.participant_id, "compile ignored: no papers submitted");
            return GuardRejection::NothingToCompile.into();
        }
        self.deadlines.compiler.stop();
        self.record_revision(actor, notes);
        let message = format!(
            "{} compiled {} paper(s) for review",
            actor.display_name,
            self.papers.len()
        );
        self.commit(actor, Stage::CompiledForReview, message).into()
    }

    /// Opens the reviewer portal. Driven by the session coordinator.
    pub fn begin_review(&mut self, actor: &Actor) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::BeginReview, actor) {
            return rejection.into();
        }
        self.set_paper_status(PaperStatus::Submitted, PaperStatus::InReview);
        self.state.portal_open = true;
        let message = format!("{} opened the review session", actor.display_name);
        self.commit(actor, Stage::ReviewInProgress, message).into()
    }

    /// Closes the reviewer portal after a session ends
    pub fn conclude_review(&mut self, actor: &Actor, expired: bool) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::ConcludeReview, actor) {
            return rejection.into();
        }
        self.set_paper_status(PaperStatus::InReview, PaperStatus::Reviewed);
        self.state.portal_open = false;
        let (stage, message) = if expired {
            (Stage::ReviewExpired, "Review window lapsed".to_string())
        } else {
            (Stage::ReviewReturned, format!("Review returned by {}", actor.display_name))
        };
        self.commit(actor, stage, message).into()
    }

    /// Send reviewed papers back to the compiler with a fresh compiler deadline
    pub fn return_to_compiler(
        &mut self,
        actor: &Actor,
        notes: &str,
        deadline: DeadlineDuration,
    ) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::ReturnToCompiler, actor) {
            return rejection.into();
        }
        let now = self.clock.now();
        self.set_paper_status(PaperStatus::Reviewed, PaperStatus::Submitted);
        self.deadlines.compiler.duration = deadline;
        self.deadlines.compiler.start(now);
        self.state.last_decision = Some(Decision::Returned);
        let message = format!(
            "{} returned the papers to the compiler ({}d {}h {}m): {notes}",
            actor.display_name, deadline.days, deadline.hours, deadline.minutes
        );
        self.commit(actor, Stage::SubmittedToCompiler, message).into()
    }

    pub fn sanitize_feedback(&mut self, actor: &Actor, notes: &str) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::SanitizeFeedback, actor) {
            return rejection.into();
        }
        let message = format!("{} sanitized reviewer feedback: {notes}", actor.display_name);
        self.commit(actor, Stage::SanitizedForRevision, message).into()
    }

    pub fn complete_revision(&mut self, actor: &Actor, notes: &str) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::CompleteRevision, actor) {
            return rejection.into();
        }
        self.record_revision(actor, notes);
        let message = format!("{} completed the revision", actor.display_name);
        self.commit(actor, Stage::RevisionComplete, message).into()
    }

    pub fn forward_for_approval(&mut self, actor: &Actor) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::ForwardForApproval, actor) {
            return rejection.into();
        }
        let message = format!("{} forwarded the paper for approval", actor.display_name);
        self.commit(actor, Stage::AwaitingApproval, message).into()
    }

    pub fn approve(&mut self, actor: &Actor, notes: &str) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::Approve, actor) {
            return rejection.into();
        }
        for paper in &mut self.papers {
            paper.status = PaperStatus::Approved;
        }
        self.state.last_decision = Some(Decision::Approved);
        self.record_revision(actor, notes);
        let message = format!("{} approved revision {}", actor.display_name, self.state.current_revision);
        self.commit(actor, Stage::Approved, message).into()
    }

    /// Rejects the current revision and slates it for disposal
    pub fn reject(&mut self, actor: &Actor, notes: &str) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::Reject, actor) {
            return rejection.into();
        }
        let now = self.clock.now();
        self.state.awaiting_recycle = true;
        self.state.last_decision = Some(Decision::Rejected);
        self.destruction_log.push(DestructionLogEntry::new(
            self.state.current_revision,
            actor.display_name.clone(),
            notes,
            now,
        ));
        let message = format!(
            "{} rejected revision {}: {notes}",
            actor.display_name, self.state.current_revision
        );
        self.commit(actor, Stage::Rejected, message).into()
    }

    /// Recycle a rejected cycle into a fresh one at `revision + 1`
    pub fn restart_cycle(&mut self, actor: &Actor) -> TransitionOutcome {
        if let Err(rejection) = self.guard(Operation::RestartCycle, actor) {
            return rejection.into();
        }
        if !self.state.awaiting_recycle {
            debug!("restart ignored: cycle is not awaiting recycle");
            return GuardRejection::WrongStage.into();
        }
        self.state.current_revision += 1;
        self.state.awaiting_recycle = false;
        self.state.last_decision = None;
        self.state.portal_open = false;
        self.papers.clear();
        self.deadlines.reset();
        let message = format!(
            "{} restarted the cycle at revision {}",
            actor.display_name, self.state.current_revision
        );
        self.record_revision(actor, &message);
        self.commit(actor, Stage::AwaitingAuthor, message).into()
    }

    /// Start the author countdown
    pub fn start_author_window(&mut self, actor: &Actor) -> TransitionOutcome {
        if !actor.has_role(Role::FinalAuthority) {
            return self.ignore("start-author-window", GuardRejection::WrongRole);
        }
        if self.state.stage != Stage::AwaitingAuthor {
            return self.ignore("start-author-window", GuardRejection::WrongStage);
        }
        if self.deadlines.author.active {
            return self.ignore("start-author-window", GuardRejection::AlreadyInState);
        }
        let now = self.clock.now();
        self.deadlines.author.start(now);
        let d = self.deadlines.author.duration;
        let message = format!(
            "Author window opened ({}d {}h {}m)",
            d.days, d.hours, d.minutes
        );
        self.commit(actor, self.state.stage, message).into()
    }

    /// Final-authority override of either window
    pub fn set_window(
        &mut self,
        actor: &Actor,
        kind: WindowKind,
        active: bool,
        duration: Option<DeadlineDuration>,
    ) -> TransitionOutcome {
        if !actor.has_role(Role::FinalAuthority) {
            return self.ignore("set-window", GuardRejection::WrongRole);
        }
        let now = self.clock.now();
        let window = self.deadlines.window_mut(kind);
        let duration_changed = duration.is_some_and(|d| d != window.duration);
        if window.active == active && !duration_changed {
            return self.ignore("set-window", GuardRejection::AlreadyInState);
        }
        if let Some(d) = duration {
            window.duration = d;
        }
        if active {
            window.start(now);
        } else {
            window.stop();
        }
        let message = format!(
            "{} {} the {:?} window",
            actor.display_name,
            if active { "started" } else { "stopped" },
            kind
        );
        self.commit(actor, self.state.stage, message).into()
    }

    /// Poll both windows. Emits at most one timeline event.
    pub fn tick(&mut self) -> Option<TimelineEvent> {
        let now = self.clock.now();
        let tick = self.deadlines.tick(now)?;
        let system = Actor::system();
        let event = match tick {
            DeadlineTick::AuthorLapsed { compiler_started } => {
                let stage = if self.state.stage == Stage::AwaitingAuthor {
                    Stage::SubmittedToCompiler
                } else {
                    self.state.stage
                };
                let message = if compiler_started {
                    "Author window lapsed; compiler window opened".to_string()
                } else {
                    "Author window lapsed".to_string()
                };
                self.commit(&system, stage, message)
            }
            DeadlineTick::CompilerLapsed => {
                self.commit(&system, self.state.stage, "Compiler window lapsed".to_string())
            }
        };
        Some(event)
    }

    fn guard(&self, op: Operation, actor: &Actor) -> Result<(), GuardRejection> {
        state_machine::check(op, actor, self.state.stage).map_err(|rejection| {
            debug!(
                ?op,
                stage = %self.state.stage,
                actor = %actor.participant_id,
                %rejection,
                "transition ignored"
            );
            rejection
        })
    }

    fn ignore(&self, what: &str, rejection: GuardRejection) -> TransitionOutcome {
        debug!(operation = what, stage = %self.state.stage, %rejection, "transition ignored");
        rejection.into()
    }

    fn set_paper_status(&mut self, from: PaperStatus, to: PaperStatus) {
        for paper in self.papers.iter_mut().filter(|p| p.status == from) {
            paper.status = to;
        }
    }

    fn record_revision(&mut self, actor: &Actor, notes: &str) {
        let now = self.clock.now();
        let entry = self
            .ledger
            .record(self.state.current_revision, actor.display_name.clone(), notes, now);
        debug!(label = %entry.label, "revision recorded");
    }

    fn commit(&mut self, actor: &Actor, stage: Stage, message: String) -> TimelineEvent {
        let from = self.state.stage;
        self.state.stage = stage;
        let event = TimelineEvent::new(self.clock.now(), actor.display_name.clone(), message, stage);
        self.state.timeline.append(event.clone());
        info!(%from, to = %stage, actor = %actor.participant_id, "{}", event.message);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};

    fn engine() -> (WorkflowEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (WorkflowEngine::new(clock.clone(), DeadlinePlan::default()), clock)
    }

    fn author() -> Actor {
        Actor::new("author-1", "Ada", [Role::Author])
    }

    fn compiler() -> Actor {
        Actor::new("compiler-1", "Cy", [Role::Compiler])
    }

    fn authority() -> Actor {
        Actor::new("fa-1", "Fay", [Role::FinalAuthority])
    }

    #[test]
    fn new_cycle_records_initial_entry() {
        let (engine, _) = engine();
        assert_eq!(engine.stage(), Stage::AwaitingAuthor);
        assert_eq!(engine.ledger().latest().map(|e| e.label.as_str()), Some("v1.1"));
        assert_eq!(engine.timeline().len(), 1);
        assert_eq!(engine.state().current_revision(), 1);
    }

    #[test]
    fn duplicate_submit_is_idempotent() {
        let (mut engine, _) = engine();
        let first = engine.submit_paper(&author(), PaperDraft::new("P1", "blob://1"));
        let second = engine.submit_paper(&author(), PaperDraft::new("P1", "blob://1"));

        assert!(first.is_applied());
        assert_eq!(second.rejection(), Some(GuardRejection::AlreadyInState));
        assert_eq!(engine.papers().len(), 1);
        assert_eq!(engine.timeline().len(), 2);
    }

    #[test]
    fn compiler_submission_carries_provenance() {
        let (mut engine, _) = engine();
        let _ = engine.submit_paper(&author(), PaperDraft::new("P1", "blob://1"));
        let outcome = engine.submit_paper(&compiler(), PaperDraft::new("P2", "blob://2"));

        assert!(outcome.is_applied());
        assert_eq!(engine.papers()[1].submitted_by_role, Role::Compiler);
        assert_eq!(engine.ledger().latest().map(|e| e.label.as_str()), Some("v1.3"));
    }

    #[test]
    fn compile_requires_papers() {
        let (mut engine, clock) = engine();
        let _ = engine.start_author_window(&authority());
        clock.advance(Duration::days(7));
        assert!(engine.tick().is_some());
        assert_eq!(engine.stage(), Stage::SubmittedToCompiler);

        let outcome = engine.compile_for_review(&compiler(), "");
        assert_eq!(outcome.rejection(), Some(GuardRejection::NothingToCompile));
    }

    #[test]
    fn author_window_expiry_cascades_in_one_event() {
        let (mut engine, clock) = engine();
        assert!(engine.start_author_window(&authority()).is_applied());
        let before = engine.timeline().len();

        clock.advance(Duration::days(7));
        let event = engine.tick().expect("cascade event");

        assert_eq!(engine.timeline().len(), before + 1);
        assert_eq!(event.stage, Stage::SubmittedToCompiler);
        assert!(!engine.deadlines().author.active);
        assert!(engine.deadlines().compiler.active);
        assert!(engine.tick().is_none());
    }

    #[test]
    fn non_authority_cannot_toggle_windows() {
        let (mut engine, _) = engine();
        let outcome = engine.set_window(&compiler(), WindowKind::Compiler, true, None);
        assert_eq!(outcome.rejection(), Some(GuardRejection::WrongRole));
        assert!(!engine.deadlines().compiler.active);
    }

    #[test]
    fn manual_override_can_run_both_windows() {
        let (mut engine, _) = engine();
        let fa = authority();
        assert!(engine.start_author_window(&fa).is_applied());
        assert!(engine.set_window(&fa, WindowKind::Compiler, true, None).is_applied());
        assert!(engine.deadlines().author.active && engine.deadlines().compiler.active);
    }

    #[test]
    fn returned_deadline_applies_to_one_compiler_run() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let plan = DeadlinePlan {
            author: DeadlineDuration::days(7),
            compiler: DeadlineDuration::days(5),
        };
        let mut engine = WorkflowEngine::new(clock.clone(), plan);
        let fa = authority();
        let cy = compiler();

        let _ = engine.submit_paper(&author(), PaperDraft::new("P1", "blob://1"));
        let _ = engine.compile_for_review(&cy, "");
        let _ = engine.begin_review(&fa);
        let _ = engine.conclude_review(&Actor::system(), false);
        assert!(engine
            .return_to_compiler(&fa, "needs work", DeadlineDuration::days(3))
            .is_applied());
        assert_eq!(engine.deadlines().compiler.duration, DeadlineDuration::days(3));

        let _ = engine.compile_for_review(&cy, "");
        let _ = engine.begin_review(&fa);
        let _ = engine.conclude_review(&Actor::system(), false);
        let _ = engine.sanitize_feedback(&fa, "");
        let _ = engine.complete_revision(&cy, "");
        let _ = engine.forward_for_approval(&cy);
        assert!(engine.reject(&fa, "no").is_applied());
        assert!(engine.restart_cycle(&fa).is_applied());
        assert_eq!(engine.deadlines().compiler.duration, plan.compiler);

        assert!(engine.start_author_window(&fa).is_applied());
        clock.advance(Duration::days(7));
        assert!(engine.tick().is_some());
        assert!(engine.deadlines().compiler.active);
        assert_eq!(engine.deadlines().compiler.duration, plan.compiler);
    }

    #[test]
    fn snapshot_round_trip_preserves_chain() {
        let (mut engine, clock) = engine();
        let _ = engine.submit_paper(&author(), PaperDraft::new("P1", "blob://1"));
        let snapshot = engine.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: WorkflowSnapshot = serde_json::from_str(&json).unwrap();

        let restored = WorkflowEngine::restore(decoded, clock).unwrap();
        assert_eq!(restored.stage(), Stage::SubmittedToCompiler);
        assert_eq!(restored.timeline(), engine.timeline());
    }
}
