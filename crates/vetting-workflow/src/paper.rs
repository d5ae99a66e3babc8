//! Papers and effective-stage reconciliation
//!
//! A paper's status runs independently of the workflow stage. After a restart
//! the stored stage may be stale, so reads go through
//! [`derive_effective_stage`], which only looks at what was persisted.

use crate::state_machine::Stage;
use crate::types::{PaperId, ParticipantId, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaperStatus {
    Submitted,
    InReview,
    Reviewed,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,
    pub title: String,
    /// Opaque reference into document storage; never dereferenced here
    pub content_ref: String,
    pub status: PaperStatus,
    pub submitted_by_role: Role,
    pub submitted_by: ParticipantId,
    pub submitted_at: DateTime<Utc>,
}

/// Input for a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperDraft {
    pub title: String,
    pub content_ref: String,
}

impl PaperDraft {
    pub fn new(title: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content_ref: content_ref.into(),
        }
    }
}

/// Reconcile the stored stage with the aggregate of paper statuses.
///
/// Returns whichever of the two is further along: the stored stage, or the
/// lowest stage the statuses imply. Pure and idempotent.
pub fn derive_effective_stage(papers: &[Paper], stored: Stage) -> Stage {
    if papers.is_empty() {
        return stored;
    }
    let all = |status: &[PaperStatus]| papers.iter().all(|p| status.contains(&p.status));
    let floor = if all(&[PaperStatus::Approved]) {
        Stage::Approved
    } else if papers.iter().any(|p| p.status == PaperStatus::InReview) {
        Stage::ReviewInProgress
    } else if all(&[PaperStatus::Reviewed, PaperStatus::Approved]) {
        Stage::ReviewReturned
    } else {
        Stage::SubmittedToCompiler
    };
    if floor.rank() > stored.rank() {
        floor
    } else {
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paper(status: PaperStatus) -> Paper {
        Paper {
            id: PaperId::new(),
            title: "P".into(),
            content_ref: "blob://p".into(),
            status,
            submitted_by_role: Role::Author,
            submitted_by: ParticipantId::from("a"),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn no_papers_keeps_stored_stage() {
        assert_eq!(derive_effective_stage(&[], Stage::CompiledForReview), Stage::CompiledForReview);
    }

    #[test]
    fn stale_stage_is_lifted_by_review_status() {
        let papers = vec![paper(PaperStatus::InReview), paper(PaperStatus::Submitted)];
        assert_eq!(
            derive_effective_stage(&papers, Stage::AwaitingAuthor),
            Stage::ReviewInProgress
        );

        let reviewed = vec![paper(PaperStatus::Reviewed), paper(PaperStatus::Reviewed)];
        assert_eq!(
            derive_effective_stage(&reviewed, Stage::CompiledForReview),
            Stage::ReviewReturned
        );
    }

    #[test]
    fn later_stored_stage_wins() {
        let reviewed = vec![paper(PaperStatus::Reviewed)];
        assert_eq!(
            derive_effective_stage(&reviewed, Stage::SanitizedForRevision),
            Stage::SanitizedForRevision
        );
        assert_eq!(derive_effective_stage(&reviewed, Stage::ReviewExpired), Stage::ReviewExpired);
    }

    fn status_strategy() -> impl Strategy<Value = PaperStatus> {
        prop_oneof![
            Just(PaperStatus::Submitted),
            Just(PaperStatus::InReview),
            Just(PaperStatus::Reviewed),
            Just(PaperStatus::Approved),
        ]
    }

    proptest! {
        #[test]
        fn prop_derivation_is_idempotent(
            statuses in proptest::collection::vec(status_strategy(), 0..6),
            stored_idx in 0usize..11,
        ) {
            let papers: Vec<Paper> = statuses.into_iter().map(paper).collect();
            let stored = Stage::ALL[stored_idx];
            let once = derive_effective_stage(&papers, stored);
            let twice = derive_effective_stage(&papers, once);
            prop_assert_eq!(once, twice);
            prop_assert!(once.rank() >= stored.rank());
        }
    }
}
