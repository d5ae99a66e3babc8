//! Vetting simulator
//!
//! Drives a [`VettingService`] with a seeded stream of random operations
//! and checks the service invariants after every step. A run is
//! reproducible from its seed.

use crate::config::VettingConfig;
use crate::error::VettingError;
use crate::persistence::{MemoryStore, StateStore};
use crate::service::{ServiceDeps, VettingService};
use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use ulid::Ulid;
use vetting_session::{
    CaptureError, CaptureHandle, CaptureProvider, SessionError, TracingSink, ViolationKind,
};
use vetting_workflow::{
    Actor, Clock, DeadlineDuration, ManualClock, PaperDraft, ParticipantId, Role, Stage,
    TransitionOutcome, WorkflowEngine,
};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub total_operations: u64,
    pub operation_distribution: OperationDistribution,
    pub reviewers: usize,
    /// Chance that a reviewer declines the capture prompt
    pub capture_denial_rate: f64,
    pub session_minutes: u32,
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 10_000,
            operation_distribution: OperationDistribution::default(),
            reviewers: 4,
            capture_denial_rate: 0.1,
            session_minutes: 5,
            stop_on_first_violation: true,
        }
    }
}

/// Probability distribution for operation generation
#[derive(Debug, Clone)]
pub struct OperationDistribution {
    /// Operations by the right actor at the right stage
    pub valid_ops: f64,
    /// Clock jumps and ticks
    pub clock_ops: f64,
    /// Privileged operations attempted by the wrong role
    pub invalid_ops: f64,
}

impl Default for OperationDistribution {
    fn default() -> Self {
        Self {
            valid_ops: 0.70,
            clock_ops: 0.15,
            invalid_ops: 0.15,
        }
    }
}

/// Privileged operations an impostor may try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegedOp {
    Compile,
    OpenSession,
    Approve,
    Reject,
    Restart,
    Forward,
}

#[derive(Debug, Clone)]
pub enum SimulatedOperation {
    // Workflow
    SubmitPaper,
    /// Compiler submits on the author's behalf
    SubmitOnBehalf,
    StartAuthorWindow,
    CompileForReview,
    ReturnToCompiler,
    SanitizeFeedback,
    CompleteRevision,
    ForwardForApproval,
    Approve,
    Reject,
    RestartCycle,

    // Session
    OpenSession,
    EndSession,
    CompleteReview,
    Join(usize),
    Leave(usize),
    CompleteParticipation(usize),
    Signal(usize, ViolationKind),
    FocusRegained(usize),
    Reactivate(usize),
    SaveComment(usize, u8),
    UpdateDraft(usize, u8),
    Blur(usize, u8),
    Annotate(usize, u8),

    // Clock
    Advance(i64),
    Tick,

    /// A reviewer tries a privileged operation
    Impersonate(usize, PrivilegedOp),
}

impl SimulatedOperation {
    fn name(&self) -> String {
        format!("{self:?}")
            .split('(')
            .next()
            .unwrap_or("Unknown")
            .to_string()
    }
}

/// Expected result classification for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedResult {
    Unconstrained,
    MustBeIgnored,
}

#[derive(Debug, Clone)]
pub enum Violation {
    /// Operation outcome did not match expectation
    UnexpectedOutcome {
        operation_index: u64,
        operation: SimulatedOperation,
        expected: ExpectedResult,
        actual: String,
    },
    /// The service failed in a way no caller input should cause
    ServiceFailure {
        operation_index: u64,
        operation: SimulatedOperation,
        error: String,
    },
    Invariant(InvariantViolation),
}

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub operation_index: u64,
    pub check: InvariantCheck,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    /// An open session and the in-review stage go together
    SessionMatchesStage,
    JoinedNeverRestricted,
    /// Capture handles are held exactly by enforced participants
    CaptureMatchesParticipants,
    TimelineVerifies,
    RevisionNeverDecreases,
    PersistedMatchesLive,
    ViolationsWithinWarnings,
}

#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    pub total_operations: u64,
    pub applied_operations: u64,
    pub refused_operations: u64,
    pub operations_by_type: HashMap<String, u64>,
}

impl OperationStats {
    fn record(&mut self, operation: &SimulatedOperation, applied: bool) {
        self.total_operations += 1;
        *self.operations_by_type.entry(operation.name()).or_insert(0) += 1;
        if applied {
            self.applied_operations += 1;
        } else {
            self.refused_operations += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: OperationStats,
    pub violations: Vec<Violation>,
    pub final_stage: Stage,
    pub final_revision: u32,
    pub sessions_archived: usize,
    pub timeline_events: usize,
}

impl SimulatorReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Vetting Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Total Operations: {}", self.stats.total_operations);
        let _ = writeln!(report, "Applied: {}", self.stats.applied_operations);
        let _ = writeln!(report, "Refused or Ignored: {}", self.stats.refused_operations);
        let _ = writeln!(report, "Violations: {}", self.violations.len());
        let _ = writeln!(report, "Final Stage: {}", self.final_stage);
        let _ = writeln!(report, "Final Revision: {}", self.final_revision);
        let _ = writeln!(report, "Sessions Archived: {}", self.sessions_archived);
        let _ = writeln!(report, "Timeline Events: {}", self.timeline_events);

        if !self.violations.is_empty() {
            let _ = writeln!(report, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        let _ = writeln!(report, "\n=== Result: {verdict} ===");
        report
    }
}

/// Capture device whose prompts are declined at a seeded rate
#[derive(Debug)]
struct SimCapture {
    rng: Mutex<StdRng>,
    denial_rate: f64,
    open: Mutex<HashMap<Ulid, ParticipantId>>,
}

impl SimCapture {
    fn new(seed: u64, denial_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(0x5eed))),
            denial_rate,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn open_handles(&self) -> usize {
        self.open.lock().len()
    }
}

#[async_trait]
impl CaptureProvider for SimCapture {
    async fn acquire(&self, participant: &ParticipantId) -> Result<CaptureHandle, CaptureError> {
        if self.rng.lock().gen_bool(self.denial_rate) {
            return Err(CaptureError::Denied(participant.to_string()));
        }
        let handle = CaptureHandle::new(participant.clone());
        self.open.lock().insert(handle.id, participant.clone());
        Ok(handle)
    }

    async fn release(&self, handle: CaptureHandle) -> Result<(), CaptureError> {
        match self.open.lock().remove(&handle.id) {
            Some(_) => Ok(()),
            None => Err(CaptureError::AlreadyReleased(handle.id)),
        }
    }
}

struct Cast {
    author: Actor,
    compiler: Actor,
    chair: Actor,
    reviewers: Vec<Actor>,
}

impl Cast {
    fn new(reviewers: usize) -> Self {
        Self {
            author: Actor::new("author", "Author", [Role::Author]),
            compiler: Actor::new("compiler", "Compiler", [Role::Compiler]),
            chair: Actor::new("chair", "Chair", [Role::FinalAuthority]),
            reviewers: (0..reviewers.max(1))
                .map(|i| Actor::new(format!("reviewer-{i}"), format!("Reviewer {i}"), [Role::Reviewer]))
                .collect(),
        }
    }

    fn reviewer(&self, i: usize) -> &Actor {
        &self.reviewers[i % self.reviewers.len()]
    }
}

struct Execution {
    applied: bool,
    detail: String,
}

impl From<TransitionOutcome> for Execution {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            applied: outcome.is_applied(),
            detail: match outcome.rejection() {
                Some(r) => format!("ignored: {r}"),
                None => "applied".to_string(),
            },
        }
    }
}

impl Execution {
    fn done(applied: bool) -> Self {
        Self {
            applied,
            detail: "ok".to_string(),
        }
    }

    /// Session refusals are expected traffic, other failures are not
    fn settle<T>(result: Result<T, VettingError>, applied: impl FnOnce(&T) -> bool) -> Result<Self, VettingError> {
        match result {
            Ok(value) => Ok(Self::done(applied(&value))),
            Err(VettingError::Session(e)) => Ok(Self::refused(&e)),
            Err(e) => Err(e),
        }
    }

    fn refused(error: &SessionError) -> Self {
        Self {
            applied: false,
            detail: format!("refused: {error}"),
        }
    }
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let clock = Arc::new(ManualClock::starting_now());
    let capture = Arc::new(SimCapture::new(config.seed, config.capture_denial_rate));
    let store = Arc::new(MemoryStore::new());
    let service = VettingService::new(
        VettingConfig::default().with_default_session_minutes(config.session_minutes),
        ServiceDeps {
            clock: clock.clone(),
            capture: capture.clone(),
            notifier: Arc::new(TracingSink),
            store: store.clone(),
        },
    );
    let cast = Cast::new(config.reviewers);

    let mut stats = OperationStats::default();
    let mut violations = Vec::new();
    let mut last_revision = service.current_revision().await;

    for i in 0..config.total_operations {
        let stage = service.stage().await;
        let operation = generate_operation(&mut rng, &config, stage, service.sessions().is_active());
        let expected = classify_expected_result(&operation);

        match execute_operation(&service, &cast, &clock, &operation).await {
            Ok(execution) => {
                if expected == ExpectedResult::MustBeIgnored && execution.applied {
                    violations.push(Violation::UnexpectedOutcome {
                        operation_index: i,
                        operation: operation.clone(),
                        expected,
                        actual: execution.detail,
                    });
                }
                stats.record(&operation, execution.applied);
            }
            Err(e) => {
                violations.push(Violation::ServiceFailure {
                    operation_index: i,
                    operation: operation.clone(),
                    error: e.to_string(),
                });
                stats.record(&operation, false);
            }
        }

        let found = check_invariants(i, &service, &capture, store.as_ref(), &mut last_revision).await;
        violations.extend(found.into_iter().map(Violation::Invariant));

        if config.stop_on_first_violation && !violations.is_empty() {
            break;
        }
    }

    let snapshot = service.workflow_snapshot().await;
    SimulatorReport {
        final_stage: snapshot.state.stage(),
        final_revision: snapshot.state.current_revision(),
        sessions_archived: service.archive().len(),
        timeline_events: snapshot.state.timeline().len(),
        config,
        stats,
        violations,
    }
}

fn generate_operation(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    stage: Stage,
    session_active: bool,
) -> SimulatedOperation {
    let dist = &config.operation_distribution;
    let r: f64 = rng.gen();
    if r < dist.valid_ops {
        generate_valid_operation(rng, config.reviewers, stage, session_active)
    } else if r < dist.valid_ops + dist.clock_ops {
        match rng.gen_range(0..4) {
            0 => SimulatedOperation::Tick,
            // long enough to lapse a session or a deadline
            1 => SimulatedOperation::Advance(rng.gen_range(3_600..=8 * 86_400)),
            _ => SimulatedOperation::Advance(rng.gen_range(1..=120)),
        }
    } else {
        let op = match rng.gen_range(0..6) {
            0 => PrivilegedOp::Compile,
            1 => PrivilegedOp::OpenSession,
            2 => PrivilegedOp::Approve,
            3 => PrivilegedOp::Reject,
            4 => PrivilegedOp::Restart,
            _ => PrivilegedOp::Forward,
        };
        SimulatedOperation::Impersonate(rng.gen_range(0..config.reviewers.max(1)), op)
    }
}

fn generate_valid_operation(
    rng: &mut StdRng,
    reviewers: usize,
    stage: Stage,
    session_active: bool,
) -> SimulatedOperation {
    let who = rng.gen_range(0..reviewers.max(1));
    let section = rng.gen_range(0..4u8);
    if session_active {
        return match rng.gen_range(0..14) {
            0..=2 => SimulatedOperation::Join(who),
            3 => SimulatedOperation::Leave(who),
            4 => SimulatedOperation::CompleteParticipation(who),
            5 | 6 => {
                let kind = ViolationKind::ALL[rng.gen_range(0..ViolationKind::ALL.len())];
                SimulatedOperation::Signal(who, kind)
            }
            7 => SimulatedOperation::FocusRegained(who),
            8 => SimulatedOperation::Reactivate(who),
            9 | 10 => SimulatedOperation::SaveComment(who, section),
            11 => {
                if rng.gen_bool(0.5) {
                    SimulatedOperation::UpdateDraft(who, section)
                } else {
                    SimulatedOperation::Blur(who, section)
                }
            }
            12 => SimulatedOperation::Annotate(who, section),
            _ => {
                if rng.gen_bool(0.5) {
                    SimulatedOperation::CompleteReview
                } else {
                    SimulatedOperation::EndSession
                }
            }
        };
    }
    match stage {
        Stage::AwaitingAuthor => {
            if rng.gen_bool(0.3) {
                SimulatedOperation::StartAuthorWindow
            } else {
                SimulatedOperation::SubmitPaper
            }
        }
        Stage::SubmittedToCompiler => {
            if rng.gen_bool(0.2) {
                SimulatedOperation::SubmitOnBehalf
            } else {
                SimulatedOperation::CompileForReview
            }
        }
        Stage::CompiledForReview | Stage::ReviewInProgress => SimulatedOperation::OpenSession,
        Stage::ReviewExpired | Stage::ReviewReturned => {
            if rng.gen_bool(0.5) {
                SimulatedOperation::ReturnToCompiler
            } else {
                SimulatedOperation::SanitizeFeedback
            }
        }
        Stage::SanitizedForRevision => SimulatedOperation::CompleteRevision,
        Stage::RevisionComplete => SimulatedOperation::ForwardForApproval,
        Stage::AwaitingApproval => {
            if rng.gen_bool(0.5) {
                SimulatedOperation::Approve
            } else {
                SimulatedOperation::Reject
            }
        }
        Stage::Rejected => SimulatedOperation::RestartCycle,
        Stage::Approved => SimulatedOperation::Tick,
    }
}

fn classify_expected_result(operation: &SimulatedOperation) -> ExpectedResult {
    match operation {
        SimulatedOperation::Impersonate(..) => ExpectedResult::MustBeIgnored,
        _ => ExpectedResult::Unconstrained,
    }
}

async fn execute_operation(
    service: &VettingService,
    cast: &Cast,
    clock: &ManualClock,
    operation: &SimulatedOperation,
) -> Result<Execution, VettingError> {
    use SimulatedOperation as Op;

    let section_key = |s: &u8| format!("section-{s}");
    let id = |i: &usize| cast.reviewer(*i).participant_id.clone();

    Ok(match operation {
        Op::SubmitPaper => service
            .submit_paper(&cast.author, PaperDraft::new("Draft", "blob://draft"))
            .await?
            .into(),
        Op::SubmitOnBehalf => service
            .submit_paper(&cast.compiler, PaperDraft::new("Late draft", "blob://late"))
            .await?
            .into(),
        Op::StartAuthorWindow => service.start_author_window(&cast.chair).await?.into(),
        Op::CompileForReview => service.compile_for_review(&cast.compiler, "compiled").await?.into(),
        Op::ReturnToCompiler => service
            .return_to_compiler(&cast.chair, "see comments", DeadlineDuration::days(2))
            .await?
            .into(),
        Op::SanitizeFeedback => service.sanitize_feedback(&cast.chair, "sanitized").await?.into(),
        Op::CompleteRevision => service.complete_revision(&cast.compiler, "revised").await?.into(),
        Op::ForwardForApproval => service.forward_for_approval(&cast.compiler).await?.into(),
        Op::Approve => service.approve(&cast.chair, "approved").await?.into(),
        Op::Reject => service.reject(&cast.chair, "rejected").await?.into(),
        Op::RestartCycle => service.restart_cycle(&cast.chair).await?.into(),

        Op::OpenSession => service.open_session(&cast.chair, None).await?.into(),
        Op::EndSession => Execution::settle(service.end_session(&cast.chair).await, Option::is_some)?,
        Op::CompleteReview => {
            Execution::settle(service.complete_review(&cast.chair).await, Option::is_some)?
        }
        Op::Join(i) => Execution::settle(service.join(cast.reviewer(*i)).await, |_| true)?,
        Op::Leave(i) => Execution::settle(service.leave(&id(i)).await, |_| true)?,
        Op::CompleteParticipation(i) => {
            Execution::settle(service.complete_participation(&id(i)).await, |_| true)?
        }
        Op::Signal(i, kind) => Execution::settle(service.report_signal(&id(i), *kind).await, |v| {
            v.warning().is_some()
        })?,
        Op::FocusRegained(i) => Execution::settle(service.focus_regained(&id(i)).await, |cleared| *cleared)?,
        Op::Reactivate(i) => Execution::settle(service.reactivate(&cast.chair, &id(i)).await, |_| true)?,
        Op::SaveComment(i, s) => Execution::settle(
            service
                .save_comment(&id(i), &section_key(s), "looks fine", None, clock.now())
                .await,
            |stored| *stored,
        )?,
        Op::UpdateDraft(i, s) => Execution::settle(
            service.update_draft(&id(i), &section_key(s), "typing").await,
            |_| true,
        )?,
        Op::Blur(i, s) => {
            Execution::settle(service.blur(&id(i), &section_key(s)).await, |_| true)?
        }
        Op::Annotate(i, s) => Execution::settle(
            service.annotate(&id(i), &section_key(s), "note").await,
            |_| true,
        )?,

        Op::Advance(secs) => {
            clock.advance(Duration::seconds(*secs));
            Execution::done(true)
        }
        Op::Tick => {
            let report = service.tick().await?;
            Execution::done(report.deadline.is_some() || report.poll.closed.is_some())
        }

        Op::Impersonate(i, op) => {
            let impostor = cast.reviewer(*i);
            let outcome = match op {
                PrivilegedOp::Compile => service.compile_for_review(impostor, "x").await?,
                PrivilegedOp::OpenSession => service.open_session(impostor, None).await?,
                PrivilegedOp::Approve => service.approve(impostor, "x").await?,
                PrivilegedOp::Reject => service.reject(impostor, "x").await?,
                PrivilegedOp::Restart => service.restart_cycle(impostor).await?,
                PrivilegedOp::Forward => service.forward_for_approval(impostor).await?,
            };
            outcome.into()
        }
    })
}

async fn check_invariants(
    operation_index: u64,
    service: &VettingService,
    capture: &SimCapture,
    store: &dyn StateStore,
    last_revision: &mut u32,
) -> Vec<InvariantViolation> {
    let mut found = Vec::new();
    let mut fail = |check: InvariantCheck, details: String| {
        found.push(InvariantViolation {
            operation_index,
            check,
            details,
        });
    };

    let snapshot = service.workflow_snapshot().await;
    let stage = snapshot.state.stage();
    let session = service.session();
    if session.active != (stage == Stage::ReviewInProgress) {
        fail(
            InvariantCheck::SessionMatchesStage,
            format!("session active = {}, stage = {stage}", session.active),
        );
    }

    let participants = service.participants();
    let restricted = service.restricted();
    let joined: HashSet<_> = participants.iter().map(|p| &p.participant_id).collect();
    if let Some(id) = restricted.iter().find(|id| joined.contains(id)) {
        fail(InvariantCheck::JoinedNeverRestricted, format!("{id} is joined and restricted"));
    }

    let enforced = participants.iter().filter(|p| p.enforced).count();
    if capture.open_handles() != enforced {
        fail(
            InvariantCheck::CaptureMatchesParticipants,
            format!("{} handles open, {enforced} enforced participants", capture.open_handles()),
        );
    }

    if let Some(p) = participants.iter().find(|p| p.violation_count > p.total_warnings) {
        fail(
            InvariantCheck::ViolationsWithinWarnings,
            format!("{}: {} violations, {} warnings", p.participant_id, p.violation_count, p.total_warnings),
        );
    }

    if let Err(e) = snapshot.state.timeline().verify_integrity() {
        fail(InvariantCheck::TimelineVerifies, e.to_string());
    }

    let revision = snapshot.state.current_revision();
    if revision < *last_revision {
        fail(
            InvariantCheck::RevisionNeverDecreases,
            format!("revision went from {last_revision} to {revision}"),
        );
    }
    *last_revision = revision;

    match store.load().await {
        Ok(persisted) => {
            let restorable = persisted
                .workflow
                .map(|w| WorkflowEngine::restore(w, Arc::new(ManualClock::starting_now())));
            match restorable {
                Some(Ok(engine)) if engine.snapshot() != snapshot => fail(
                    InvariantCheck::PersistedMatchesLive,
                    "persisted workflow differs from live state".to_string(),
                ),
                Some(Err(e)) => fail(InvariantCheck::PersistedMatchesLive, e.to_string()),
                _ => {}
            }
        }
        Err(e) => fail(InvariantCheck::PersistedMatchesLive, e.to_string()),
    }

    found
}
