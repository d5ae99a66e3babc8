use crate::types::{Actor, Role};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of the paper in the custodianship workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    AwaitingAuthor,
    SubmittedToCompiler,
    CompiledForReview,
    ReviewInProgress,
    ReviewExpired,
    ReviewReturned,
    SanitizedForRevision,
    RevisionComplete,
    AwaitingApproval,
    Approved,
    Rejected,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::AwaitingAuthor,
        Stage::SubmittedToCompiler,
        Stage::CompiledForReview,
        Stage::ReviewInProgress,
        Stage::ReviewExpired,
        Stage::ReviewReturned,
        Stage::SanitizedForRevision,
        Stage::RevisionComplete,
        Stage::AwaitingApproval,
        Stage::Approved,
        Stage::Rejected,
    ];

    /// Progress rank along the forward path. Alternative outcomes share a rank.
    pub fn rank(self) -> u8 {
        use Stage::*;
        match self {
            AwaitingAuthor => 0,
            SubmittedToCompiler => 1,
            CompiledForReview => 2,
            ReviewInProgress => 3,
            ReviewExpired | ReviewReturned => 4,
            SanitizedForRevision => 5,
            RevisionComplete => 6,
            AwaitingApproval => 7,
            Approved | Rejected => 8,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Approved
    }

    pub fn as_str(self) -> &'static str {
        use Stage::*;
        match self {
            AwaitingAuthor => "awaiting-author",
            SubmittedToCompiler => "submitted-to-compiler",
            CompiledForReview => "compiled-for-review",
            ReviewInProgress => "review-in-progress",
            ReviewExpired => "review-expired",
            ReviewReturned => "review-returned",
            SanitizedForRevision => "sanitized-for-revision",
            RevisionComplete => "revision-complete",
            AwaitingApproval => "awaiting-approval",
            Approved => "approved",
            Rejected => "rejected",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    SubmitPaper,
    CompileForReview,
    BeginReview,
    ConcludeReview,
    ReturnToCompiler,
    SanitizeFeedback,
    CompleteRevision,
    ForwardForApproval,
    Approve,
    Reject,
    RestartCycle,
}

impl Operation {
    /// Stage a successful application normally lands on.
    pub fn nominal_target(self) -> Stage {
        use Operation::*;
        match self {
            SubmitPaper | ReturnToCompiler => Stage::SubmittedToCompiler,
            CompileForReview => Stage::CompiledForReview,
            BeginReview => Stage::ReviewInProgress,
            ConcludeReview => Stage::ReviewReturned,
            SanitizeFeedback => Stage::SanitizedForRevision,
            CompleteRevision => Stage::RevisionComplete,
            ForwardForApproval => Stage::AwaitingApproval,
            Approve => Stage::Approved,
            Reject => Stage::Rejected,
            RestartCycle => Stage::AwaitingAuthor,
        }
    }
}

/// Why a guarded transition did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GuardRejection {
    #[error("actor holds no role permitted for this operation")]
    WrongRole,
    #[error("operation not permitted from the current stage")]
    WrongStage,
    #[error("workflow is already in the target state")]
    AlreadyInState,
    #[error("no papers have been submitted")]
    NothingToCompile,
}

fn permits(role: Role, op: Operation, stage: Stage) -> bool {
    use Operation::*;
    use Role::*;
    use Stage::*;
    matches!(
        (op, role, stage),
        (SubmitPaper, Author, AwaitingAuthor)
            | (SubmitPaper, Compiler, AwaitingAuthor | SubmittedToCompiler)
            | (CompileForReview, Compiler, SubmittedToCompiler)
            | (BeginReview, FinalAuthority, CompiledForReview)
            | (ConcludeReview, FinalAuthority | System, ReviewInProgress)
            | (ReturnToCompiler | SanitizeFeedback, FinalAuthority, ReviewReturned | ReviewExpired)
            | (CompleteRevision, Compiler, SanitizedForRevision)
            | (ForwardForApproval, Compiler, RevisionComplete)
            | (Approve | Reject, FinalAuthority, AwaitingApproval)
            | (RestartCycle, FinalAuthority, Rejected)
    )
}

/// Pure guard: may `role` apply `op` while the workflow sits at `stage`?
pub fn can_transition(role: Role, stage: Stage, op: Operation) -> bool {
    permits(role, op, stage)
}

pub fn allowed_operations(role: Role, stage: Stage) -> Vec<Operation> {
    use Operation::*;
    [
        SubmitPaper,
        CompileForReview,
        BeginReview,
        ConcludeReview,
        ReturnToCompiler,
        SanitizeFeedback,
        CompleteRevision,
        ForwardForApproval,
        Approve,
        Reject,
        RestartCycle,
    ]
    .into_iter()
    .filter(|op| permits(role, *op, stage))
    .collect()
}

/// Checks every role the actor holds. A repeated click that finds the
/// workflow already at the operation's target is reported as `AlreadyInState`.
pub fn check(op: Operation, actor: &Actor, stage: Stage) -> Result<(), GuardRejection> {
    if actor.roles().any(|role| permits(role, op, stage)) {
        return Ok(());
    }
    if op.nominal_target() == stage {
        return Err(GuardRejection::AlreadyInState);
    }
    let holds_some_permitted_role = actor
        .roles()
        .any(|role| Stage::ALL.iter().any(|s| permits(role, op, *s)));
    if holds_some_permitted_role {
        Err(GuardRejection::WrongStage)
    } else {
        Err(GuardRejection::WrongRole)
    }
}
