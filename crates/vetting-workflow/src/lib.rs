//! Vetting Workflow - custodianship state machine for a paper under review
//!
//! The paper moves through fixed roles (author, compiler, reviewers, final
//! authority) before release. This crate owns:
//! - The guarded stage state machine with its reject/recycle loop
//! - The two cascading deadline windows (author window, then compiler window)
//! - The append-only timeline and the `v{major}.{sequence}` revision ledger
//! - Effective-stage reconciliation from persisted paper statuses
//!
//! # Example
//!
//! ```rust,ignore
//! use vetting_workflow::prelude::*;
//!
//! let clock = Arc::new(SystemClock);
//! let mut engine = WorkflowEngine::new(clock, DeadlinePlan::default());
//!
//! let author = Actor::new("t-17", "Ada", [Role::Author]);
//! let outcome = engine.submit_paper(&author, PaperDraft::new("Physics P1", "blob://p1"));
//! assert!(outcome.is_applied());
//! assert_eq!(engine.stage(), Stage::SubmittedToCompiler);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod paper;
pub mod state_machine;
pub mod timeline;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use deadline::{DeadlineDuration, DeadlinePlan, DeadlineTick, DeadlineWindow, Deadlines, WindowKind};
pub use engine::{Decision, TransitionOutcome, WorkflowEngine, WorkflowSnapshot, WorkflowState};
pub use error::WorkflowError;
pub use ledger::{DestructionLogEntry, RevisionLedger, RevisionLedgerEntry};
pub use paper::{derive_effective_stage, Paper, PaperDraft, PaperStatus};
pub use state_machine::{can_transition, GuardRejection, Operation, Stage};
pub use timeline::{Timeline, TimelineEvent};
pub use types::{Actor, EntryId, EventId, PaperId, ParticipantId, Role};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the workflow
    pub use crate::{
        Actor, Clock, DeadlineDuration, DeadlinePlan, ManualClock, PaperDraft, Role, Stage,
        SystemClock, TransitionOutcome, WorkflowEngine,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
