//! Integration tests for the session coordinator

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::{Arc, OnceLock, Weak};
use vetting_session::{
    CaptureError, CaptureHandle, CaptureProvider, CloseReason, CoordinatorSettings, NoticeLevel,
    ParticipationOutcome, SessionCoordinator, SessionError, SessionSignal, SessionStatus,
    SignalVerdict, ViolationKind,
};
use vetting_test_utils::{
    advance, final_authority, fixed_clock, reviewer, setup_coordinator, CoordinatorFixture,
    RecordingNotifier,
};
use vetting_workflow::{Clock, PaperId, ParticipantId};

fn open(fx: &CoordinatorFixture, minutes: u32) {
    fx.coordinator
        .open_session(&final_authority(), vec![PaperId::new()], minutes)
        .expect("final authority opens the session");
}

#[tokio::test]
async fn critical_signal_excludes_only_the_offender() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    let b = reviewer(2);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator.join(&b).await.unwrap();
    assert_eq!(fx.capture.open_handles(), 2);

    let verdict = fx
        .coordinator
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();
    assert!(verdict.escalates());

    assert!(!fx.coordinator.is_joined(&a.participant_id));
    assert!(fx.coordinator.restricted().contains(&a.participant_id));
    assert!(fx.coordinator.is_joined(&b.participant_id));
    assert!(!fx.capture.is_open_for(&a.participant_id));
    assert!(fx.capture.is_open_for(&b.participant_id));

    let chair = final_authority().participant_id;
    let alerts = fx.notifier.for_target(&chair);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, NoticeLevel::Critical);
}

#[tokio::test]
async fn denied_capture_aborts_join_cleanly() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.capture.deny(a.participant_id.clone());

    let err = fx.coordinator.join(&a).await.unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied { .. }));
    assert!(err.is_user_visible());
    assert!(!fx.coordinator.is_joined(&a.participant_id));
    assert!(fx.coordinator.restricted().is_empty());
    assert_eq!(fx.capture.open_handles(), 0);

    fx.capture.allow(&a.participant_id);
    assert!(fx.coordinator.join(&a).await.is_ok());
}

#[tokio::test]
async fn restricted_participant_cannot_rejoin_until_reactivated() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();

    let err = fx.coordinator.join(&a).await.unwrap_err();
    assert_eq!(err, SessionError::Restricted(a.participant_id.clone()));
    assert_eq!(fx.capture.acquired(), 1);

    let err = fx.coordinator.reactivate(&reviewer(2), &a.participant_id).unwrap_err();
    assert!(err.is_noop());

    fx.coordinator
        .reactivate(&final_authority(), &a.participant_id)
        .unwrap();
    fx.coordinator.join(&a).await.unwrap();
    // earlier warnings are kept across the rejoin
    assert_eq!(fx.coordinator.warnings_for(&a.participant_id).len(), 1);
}

#[tokio::test]
async fn duplicate_join_is_a_noop() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    let err = fx.coordinator.join(&a).await.unwrap_err();
    assert_eq!(err, SessionError::AlreadyInState);
    assert_eq!(fx.capture.open_handles(), 1);
    assert_eq!(fx.coordinator.participants().len(), 1);
}

#[tokio::test]
async fn join_requires_an_active_session() {
    let fx = setup_coordinator();
    let err = fx.coordinator.join(&reviewer(1)).await.unwrap_err();
    assert_eq!(err, SessionError::SessionNotActive);
    assert_eq!(fx.capture.acquired(), 0);
}

#[tokio::test]
async fn final_authority_joins_without_enforcement() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let chair = final_authority();
    let receipt = fx.coordinator.join(&chair).await.unwrap();
    assert!(!receipt.enforced);
    assert!(!receipt.policy.capture_on);
    assert_eq!(fx.capture.acquired(), 0);

    let verdict = fx
        .coordinator
        .report_signal(&chair.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();
    assert_eq!(verdict, SignalVerdict::Ignored);
    assert!(fx.coordinator.is_joined(&chair.participant_id));
}

#[tokio::test]
async fn only_the_final_authority_opens_and_only_once() {
    let fx = setup_coordinator();
    let err = fx
        .coordinator
        .open_session(&reviewer(1), vec![], 30)
        .unwrap_err();
    assert!(matches!(err, SessionError::GuardRejected(_)));
    assert!(!fx.coordinator.is_active());

    open(&fx, 30);
    let err = fx
        .coordinator
        .open_session(&final_authority(), vec![], 30)
        .unwrap_err();
    assert_eq!(err, SessionError::AlreadyInState);

    let err = fx
        .coordinator
        .open_session(&final_authority(), vec![], 0)
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidDuration(_)));
}

#[tokio::test]
async fn close_is_idempotent_and_releases_everything() {
    let fx = setup_coordinator();
    open(&fx, 60);
    for n in 1..=3 {
        fx.coordinator.join(&reviewer(n)).await.unwrap();
    }
    fx.capture.fail_releases(true);

    let first = fx.coordinator.close_session(CloseReason::EndedByAuthority).await;
    let second = fx.coordinator.close_session(CloseReason::EndedByAuthority).await;

    let record = first.expect("first close archives");
    assert!(second.is_none());
    assert_eq!(record.status, SessionStatus::Terminated);
    assert_eq!(record.participants.len(), 3);
    assert_eq!(fx.coordinator.archive().len(), 1);
    assert_eq!(fx.capture.open_handles(), 0);
    assert!(!fx.coordinator.is_active());
    assert!(fx.coordinator.participants().is_empty());
}

#[tokio::test]
async fn later_writer_wins_the_section() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let x = reviewer(1);
    let y = reviewer(2);
    fx.coordinator.join(&x).await.unwrap();
    fx.coordinator.join(&y).await.unwrap();

    let t0 = fx.clock.now();
    fx.coordinator
        .save_comment(&x.participant_id, "sectionA", "from x", None, t0)
        .await
        .unwrap();
    advance(&fx.clock, 1);
    let t1 = fx.clock.now();
    fx.coordinator
        .save_comment(&y.participant_id, "sectionA", "from y", Some("amber".into()), t1)
        .await
        .unwrap();

    let comments = fx.coordinator.comments();
    let entry = &comments["sectionA"];
    assert_eq!(entry.text, "from y");
    assert_eq!(entry.timestamp, t1);
    assert_eq!(entry.author_id, y.participant_id);
    assert_eq!(comments.len(), 1);

    // a delayed write carrying an older timestamp does not clobber it
    let applied = fx
        .coordinator
        .save_comment(&x.participant_id, "sectionA", "stale", None, t0)
        .await
        .unwrap();
    assert!(!applied);
    assert_eq!(fx.coordinator.comments()["sectionA"].text, "from y");
}

#[tokio::test]
async fn expiry_records_critical_only_violation_count() {
    let fx = setup_coordinator();
    open(&fx, 30);
    let a = reviewer(1);
    let chair = final_authority();

    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::NewSurface)
        .await
        .unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();
    fx.coordinator.reactivate(&chair, &a.participant_id).unwrap();
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();

    advance(&fx.clock, 31 * 60);
    let report = fx.coordinator.poll().await;
    let record = report.closed.expect("expired session is archived");

    assert_eq!(record.status, SessionStatus::Expired);
    let participant = record.participant(&a.participant_id).unwrap();
    assert_eq!(participant.violation_count, 2);
    assert_eq!(participant.total_warnings, 3);
    assert_eq!(participant.outcome, ParticipationOutcome::Excluded);
}

#[tokio::test]
async fn brief_focus_loss_is_forgiven_but_sustained_loss_excludes() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    let b = reviewer(2);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator.join(&b).await.unwrap();

    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::FocusLoss)
        .await
        .unwrap();
    fx.coordinator
        .report_signal(&b.participant_id, ViolationKind::FocusLoss)
        .await
        .unwrap();
    advance(&fx.clock, 2);
    assert!(fx.coordinator.focus_regained(&a.participant_id).await.unwrap());
    assert!(fx.coordinator.poll().await.escalated.is_empty());

    advance(&fx.clock, 10);
    let report = fx.coordinator.poll().await;
    assert_eq!(report.escalated, vec![b.participant_id.clone()]);
    assert!(fx.coordinator.is_joined(&a.participant_id));
    assert!(fx.coordinator.restricted().contains(&b.participant_id));
}

/// Capture device that ends the session as soon as any handle is released
#[derive(Debug, Default)]
struct ClosingCapture {
    coordinator: OnceLock<Weak<SessionCoordinator>>,
}

#[async_trait]
impl CaptureProvider for ClosingCapture {
    async fn acquire(&self, participant: &ParticipantId) -> Result<CaptureHandle, CaptureError> {
        Ok(CaptureHandle::new(participant.clone()))
    }

    async fn release(&self, _handle: CaptureHandle) -> Result<(), CaptureError> {
        if let Some(coordinator) = self.coordinator.get().and_then(Weak::upgrade) {
            let _ = coordinator.close_session(CloseReason::EndedByAuthority).await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn escalation_restricts_even_if_the_session_closes_midway() {
    let capture = Arc::new(ClosingCapture::default());
    let clock = fixed_clock();
    let coordinator = Arc::new(SessionCoordinator::new(
        capture.clone(),
        RecordingNotifier::new(),
        clock.clone(),
        CoordinatorSettings::default(),
    ));
    capture.coordinator.set(Arc::downgrade(&coordinator)).unwrap();

    coordinator
        .open_session(&final_authority(), vec![PaperId::new()], 60)
        .unwrap();
    let a = reviewer(1);
    let b = reviewer(2);
    coordinator.join(&a).await.unwrap();
    coordinator.join(&b).await.unwrap();
    for id in [&a.participant_id, &b.participant_id] {
        coordinator
            .report_signal(id, ViolationKind::FocusLoss)
            .await
            .unwrap();
    }

    advance(&clock, 10);
    let report = coordinator.poll().await;

    assert_eq!(report.escalated.len(), 2);
    assert!(!coordinator.is_active());
    let restricted = coordinator.restricted();
    assert!(restricted.contains(&a.participant_id));
    assert!(restricted.contains(&b.participant_id));
    let record = &coordinator.archive()[0];
    assert_eq!(record.participants.len(), 2);
    assert!(record
        .participants
        .iter()
        .all(|p| p.outcome == ParticipationOutcome::Excluded && p.violation_count == 1));
}

#[tokio::test]
async fn save_after_close_is_rejected() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .close_session(CloseReason::ReviewCompleted)
        .await
        .unwrap();

    let err = fx
        .coordinator
        .save_comment(&a.participant_id, "s1", "too late", None, fx.clock.now())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::SessionNotActive);
    assert!(fx.coordinator.archive()[0].comments.is_empty());
}

#[tokio::test]
async fn action_after_lapse_closes_as_expired() {
    let fx = setup_coordinator();
    open(&fx, 10);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    advance(&fx.clock, 10 * 60);

    let err = fx
        .coordinator
        .update_draft(&a.participant_id, "s1", "typing")
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::ExpiredSession);
    assert!(!fx.coordinator.is_active());
    assert_eq!(fx.coordinator.archive()[0].status, SessionStatus::Expired);
    assert_eq!(fx.capture.open_handles(), 0);
}

#[tokio::test]
async fn departing_after_lapse_closes_as_expired() {
    let fx = setup_coordinator();
    open(&fx, 10);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    advance(&fx.clock, 11 * 60);

    let err = fx
        .coordinator
        .complete_participation(&a.participant_id)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::ExpiredSession);
    assert!(!fx.coordinator.is_active());
    let record = &fx.coordinator.archive()[0];
    assert_eq!(record.status, SessionStatus::Expired);
    assert_eq!(record.participants[0].outcome, ParticipationOutcome::PresentAtClose);
    assert_eq!(fx.capture.open_handles(), 0);
}

#[tokio::test]
async fn drafts_and_presence_are_ephemeral() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    let mut rx = fx.coordinator.subscribe();

    fx.coordinator
        .update_draft(&a.participant_id, "s1", "half a thought")
        .await
        .unwrap();
    assert_eq!(fx.coordinator.typing("s1").len(), 1);
    assert_eq!(
        fx.coordinator.drafts("s1").get(&a.participant_id).map(String::as_str),
        Some("half a thought")
    );
    assert!(matches!(rx.recv().await.unwrap(), SessionSignal::Typing { .. }));
    assert!(matches!(rx.recv().await.unwrap(), SessionSignal::Draft { .. }));

    fx.coordinator
        .save_comment(&a.participant_id, "s1", "whole thought", None, fx.clock.now())
        .await
        .unwrap();
    assert!(fx.coordinator.drafts("s1").is_empty());
    assert!(fx.coordinator.typing("s1").is_empty());
    assert!(matches!(rx.recv().await.unwrap(), SessionSignal::CommentSaved { .. }));

    fx.coordinator
        .update_draft(&a.participant_id, "s2", "x")
        .await
        .unwrap();
    advance(&fx.clock, 5);
    assert!(fx.coordinator.typing("s2").is_empty());
    assert_eq!(fx.coordinator.poll().await.presence_pruned, 1);

    let record = fx
        .coordinator
        .close_session(CloseReason::ReviewCompleted)
        .await
        .unwrap();
    assert_eq!(record.comments.len(), 1);
    assert!(fx.coordinator.drafts("s2").is_empty());
}

#[tokio::test]
async fn departed_participants_stay_on_the_record() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    let b = reviewer(2);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator.join(&b).await.unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::ClipboardAccess)
        .await
        .unwrap();
    fx.coordinator.leave(&a.participant_id).await.unwrap();
    fx.coordinator
        .complete_participation(&b.participant_id)
        .await
        .unwrap();
    assert!(fx.coordinator.is_active());
    assert_eq!(fx.capture.open_handles(), 0);

    let err = fx.coordinator.leave(&a.participant_id).await.unwrap_err();
    assert_eq!(err, SessionError::NotJoined(a.participant_id.clone()));

    assert!(fx
        .coordinator
        .annotate(&ParticipantId::from("nobody"), "s1", "x")
        .await
        .is_err());

    let record = fx
        .coordinator
        .close_session(CloseReason::ReviewCompleted)
        .await
        .unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    let a_record = record.participant(&a.participant_id).unwrap();
    assert_eq!(a_record.outcome, ParticipationOutcome::Left);
    assert_eq!(a_record.total_warnings, 1);
    assert_eq!(
        record.participant(&b.participant_id).unwrap().outcome,
        ParticipationOutcome::Completed
    );
}

#[tokio::test]
async fn annotations_are_archived() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .annotate(&a.participant_id, "s3", "check the citation")
        .await
        .unwrap();
    let record = fx
        .coordinator
        .close_session(CloseReason::EndedByAuthority)
        .await
        .unwrap();
    assert_eq!(record.annotations.len(), 1);
    assert_eq!(record.annotations[0].section_key, "s3");
}

#[tokio::test]
async fn scheduled_start_stays_pending_until_opened() {
    let fx = setup_coordinator();
    let start = fx.clock.now() + chrono::Duration::minutes(5);
    let end = start + chrono::Duration::minutes(45);
    fx.coordinator
        .schedule_session(&final_authority(), start, end)
        .unwrap();
    assert!(fx.coordinator.due_schedule().is_none());

    advance(&fx.clock, 5 * 60);
    let (actor, minutes) = fx.coordinator.due_schedule().unwrap();
    assert_eq!(actor.participant_id, final_authority().participant_id);
    assert_eq!(minutes, 45);
    advance(&fx.clock, 60);
    assert_eq!(fx.coordinator.due_schedule().map(|(_, m)| m), Some(44));

    fx.coordinator
        .open_session(&actor, vec![PaperId::new()], 44)
        .unwrap();
    assert!(fx.coordinator.due_schedule().is_none());
    fx.coordinator.close_session(CloseReason::ReviewCompleted).await;
    assert!(fx.coordinator.due_schedule().is_none());

    let err = fx
        .coordinator
        .schedule_session(&final_authority(), end, start)
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidDuration(_)));
}

#[tokio::test]
async fn snapshot_restores_durable_state() {
    let fx = setup_coordinator();
    open(&fx, 60);
    let a = reviewer(1);
    fx.coordinator.join(&a).await.unwrap();
    fx.coordinator
        .save_comment(&a.participant_id, "s1", "kept", None, fx.clock.now())
        .await
        .unwrap();
    fx.coordinator
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();

    let snapshot = fx.coordinator.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let restored = vetting_session::SessionCoordinator::restore(
        serde_json::from_str(&json).unwrap(),
        fx.capture.clone(),
        fx.notifier.clone(),
        fx.clock.clone(),
        *fx.coordinator.settings(),
    );
    assert!(restored.is_active());
    assert!(restored.restricted().contains(&a.participant_id));
    assert_eq!(restored.comments()["s1"].text, "kept");
    assert!(restored.participants().is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Join(u32),
    Leave(u32),
    Signal(u32, ViolationKind),
    Reactivate(u32),
    Tick(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let kind = prop_oneof![
        Just(ViolationKind::FocusLoss),
        Just(ViolationKind::CaptureAttempt),
        Just(ViolationKind::NewSurface),
        Just(ViolationKind::ClipboardAccess),
        Just(ViolationKind::RestrictedNavigation),
    ];
    prop_oneof![
        (1u32..5).prop_map(Op::Join),
        (1u32..5).prop_map(Op::Leave),
        ((1u32..5), kind).prop_map(|(n, k)| Op::Signal(n, k)),
        (1u32..5).prop_map(Op::Reactivate),
        (1i64..10).prop_map(Op::Tick),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn joined_and_restricted_never_overlap(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let fx = setup_coordinator();
            open(&fx, 600);
            for op in ops {
                match op {
                    Op::Join(n) => { let _ = fx.coordinator.join(&reviewer(n)).await; }
                    Op::Leave(n) => { let _ = fx.coordinator.leave(&reviewer(n).participant_id).await; }
                    Op::Signal(n, k) => { let _ = fx.coordinator.report_signal(&reviewer(n).participant_id, k).await; }
                    Op::Reactivate(n) => { let _ = fx.coordinator.reactivate(&final_authority(), &reviewer(n).participant_id); }
                    Op::Tick(s) => { advance(&fx.clock, s); let _ = fx.coordinator.poll().await; }
                }
                let restricted = fx.coordinator.restricted();
                for p in fx.coordinator.participants() {
                    assert!(!restricted.contains(&p.participant_id));
                }
                let enforced = fx.coordinator.participants().iter().filter(|p| p.enforced).count();
                assert_eq!(fx.capture.open_handles(), enforced);
            }
            let _ = fx.coordinator.close_session(CloseReason::EndedByAuthority).await;
            assert_eq!(fx.capture.open_handles(), 0);
            assert_eq!(fx.coordinator.archive().len(), 1);
        });
    }
}
