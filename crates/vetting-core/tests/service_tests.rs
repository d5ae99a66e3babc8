//! End-to-end tests for the vetting service

use chrono::Duration;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vetting_core::{
    FileStore, ServiceDeps, StateKey, StateStore, VettingConfig, VettingError, VettingService,
};
use vetting_session::{CloseReason, SessionError, SessionStatus, ViolationKind};
use vetting_test_utils::{
    advance, author, compiler, final_authority, init_test_tracing, reviewer, setup_service,
    setup_service_with, ScriptedCapture, RecordingNotifier, ServiceFixture,
};
use vetting_workflow::{
    Clock, DeadlineDuration, DeadlinePlan, GuardRejection, PaperDraft, PaperStatus, Stage,
};

async fn compiled(fx: &ServiceFixture) {
    let draft = PaperDraft::new("Exam paper", "blob://exam-v1");
    assert!(fx.service.submit_paper(&author(), draft).await.unwrap().is_applied());
    assert!(fx
        .service
        .compile_for_review(&compiler(), "ready")
        .await
        .unwrap()
        .is_applied());
}

async fn in_review(fx: &ServiceFixture, minutes: u32) {
    compiled(fx).await;
    let outcome = fx
        .service
        .open_session(&final_authority(), Some(minutes))
        .await
        .unwrap();
    assert!(outcome.is_applied());
}

#[tokio::test]
async fn submission_advances_stage_and_ledger() {
    init_test_tracing();
    let fx = setup_service();

    let outcome = fx
        .service
        .submit_paper(&author(), PaperDraft::new("Exam paper", "blob://exam-v1"))
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(fx.service.stage().await, Stage::SubmittedToCompiler);
    let labels: Vec<_> = fx.service.ledger().await.into_iter().map(|e| e.label).collect();
    assert_eq!(labels, vec!["v1.1", "v1.2"]);
    let timeline = fx.service.timeline().await;
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].stage, Stage::SubmittedToCompiler);
    assert!(fx.store.contains(StateKey::Workflow));
}

#[tokio::test]
async fn wrong_role_is_a_silent_noop() {
    let fx = setup_service();

    let outcome = fx
        .service
        .compile_for_review(&reviewer(1), "sneaky")
        .await
        .unwrap();

    assert_eq!(outcome.rejection(), Some(GuardRejection::WrongRole));
    assert_eq!(fx.service.stage().await, Stage::AwaitingAuthor);
    assert_eq!(fx.service.timeline().await.len(), 1);
    assert!(!fx.store.contains(StateKey::Workflow));
}

#[tokio::test]
async fn session_only_opens_from_compiled() {
    let fx = setup_service();

    let early = fx.service.open_session(&final_authority(), None).await.unwrap();
    assert_eq!(early.rejection(), Some(GuardRejection::WrongStage));
    assert!(!fx.service.session().active);

    compiled(&fx).await;
    let by_reviewer = fx.service.open_session(&reviewer(1), None).await.unwrap();
    assert_eq!(by_reviewer.rejection(), Some(GuardRejection::WrongRole));

    let opened = fx.service.open_session(&final_authority(), None).await.unwrap();
    assert!(opened.is_applied());
    let session = fx.service.session();
    assert!(session.active);
    assert_eq!(session.duration_minutes, Some(60));
    assert_eq!(fx.service.stage().await, Stage::ReviewInProgress);
    assert!(fx
        .service
        .papers()
        .await
        .iter()
        .all(|p| p.status == PaperStatus::InReview));

    let again = fx.service.open_session(&final_authority(), None).await.unwrap();
    assert_eq!(again.rejection(), Some(GuardRejection::AlreadyInState));
}

#[tokio::test]
async fn critical_signal_excludes_and_persists_restriction() {
    let fx = setup_service();
    in_review(&fx, 60).await;
    let a = reviewer(1);
    let b = reviewer(2);
    fx.service.join(&a).await.unwrap();
    fx.service.join(&b).await.unwrap();

    let verdict = fx
        .service
        .report_signal(&a.participant_id, ViolationKind::CaptureAttempt)
        .await
        .unwrap();
    assert!(verdict.escalates());

    let joined: Vec<_> = fx.service.participants().into_iter().map(|p| p.participant_id).collect();
    assert_eq!(joined, vec![b.participant_id.clone()]);
    assert!(fx.capture.is_open_for(&b.participant_id));
    assert!(!fx.capture.is_open_for(&a.participant_id));

    let persisted = fx.store.load().await.unwrap().session.unwrap();
    assert!(persisted.restricted.contains(&a.participant_id));

    let err = fx.service.join(&a).await.unwrap_err();
    assert!(matches!(err, VettingError::Session(SessionError::Restricted(_))));
    assert!(err.is_user_visible());
}

#[tokio::test]
async fn returning_to_compiler_restarts_compiler_window() {
    let fx = setup_service();
    in_review(&fx, 60).await;

    let record = fx.service.complete_review(&final_authority()).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert_eq!(fx.service.stage().await, Stage::ReviewReturned);
    assert!(fx
        .service
        .papers()
        .await
        .iter()
        .all(|p| p.status == PaperStatus::Reviewed));

    let outcome = fx
        .service
        .return_to_compiler(&final_authority(), "tighten section 2", DeadlineDuration::days(3))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(fx.service.stage().await, Stage::SubmittedToCompiler);
    let deadlines = fx.service.deadlines().await;
    assert!(deadlines.compiler.active);
    assert_eq!(deadlines.compiler.duration, DeadlineDuration::new(3, 0, 0));
    assert!(fx
        .service
        .papers()
        .await
        .iter()
        .all(|p| p.status == PaperStatus::Submitted));
}

#[tokio::test]
async fn later_comment_overwrites_earlier() {
    let fx = setup_service();
    in_review(&fx, 60).await;
    let x = reviewer(1);
    let y = reviewer(2);
    fx.service.join(&x).await.unwrap();
    fx.service.join(&y).await.unwrap();

    let t0 = fx.clock.now();
    assert!(fx
        .service
        .save_comment(&x.participant_id, "sectionA", "first take", None, t0)
        .await
        .unwrap());
    let t1 = t0 + Duration::seconds(5);
    assert!(fx
        .service
        .save_comment(&y.participant_id, "sectionA", "second take", Some("amber".into()), t1)
        .await
        .unwrap());

    let entry = fx.service.comments().remove("sectionA").unwrap();
    assert_eq!(entry.text, "second take");
    assert_eq!(entry.author_id, y.participant_id);
    assert_eq!(entry.timestamp, t1);

    let record = fx.service.complete_review(&final_authority()).await.unwrap().unwrap();
    assert_eq!(record.comments["sectionA"].text, "second take");
    assert_eq!(record.comments.len(), 1);
}

#[tokio::test]
async fn expiry_record_counts_only_critical_violations() {
    let fx = setup_service();
    in_review(&fx, 10).await;
    let r = reviewer(1);
    let id = r.participant_id.clone();

    fx.service.join(&r).await.unwrap();
    fx.service.report_signal(&id, ViolationKind::CaptureAttempt).await.unwrap();
    fx.service.reactivate(&final_authority(), &id).await.unwrap();
    fx.service.join(&r).await.unwrap();
    fx.service
        .report_signal(&id, ViolationKind::RestrictedNavigation)
        .await
        .unwrap();
    fx.service.report_signal(&id, ViolationKind::CaptureAttempt).await.unwrap();

    advance(&fx.clock, 11 * 60);
    let report = fx.service.tick().await.unwrap();

    let record = report.poll.closed.expect("session lapsed");
    assert_eq!(record.status, SessionStatus::Expired);
    let participant = record.participant(&id).unwrap();
    assert_eq!(participant.violation_count, 2);
    assert_eq!(participant.total_warnings, 3);
    assert!(report.concluded.unwrap().is_applied());
    assert_eq!(fx.service.stage().await, Stage::ReviewExpired);
}

#[tokio::test]
async fn lapsed_session_closes_on_next_action() {
    let fx = setup_service();
    in_review(&fx, 1).await;
    let r = reviewer(1);
    fx.service.join(&r).await.unwrap();
    advance(&fx.clock, 61);

    let err = fx
        .service
        .save_comment(&r.participant_id, "sectionA", "too late", None, fx.clock.now())
        .await
        .unwrap_err();

    assert!(matches!(err, VettingError::Session(SessionError::ExpiredSession)));
    assert!(!fx.service.session().active);
    assert_eq!(fx.capture.open_handles(), 0);
    assert_eq!(fx.service.stage().await, Stage::ReviewExpired);
    assert_eq!(fx.service.archive()[0].status, SessionStatus::Expired);
    let persisted = fx.store.load().await.unwrap();
    assert!(!persisted.session.unwrap().session.active);
    assert_eq!(persisted.workflow.unwrap().state.stage(), Stage::ReviewExpired);
}

#[tokio::test]
async fn leaving_after_lapse_closes_as_expired() {
    let fx = setup_service();
    in_review(&fx, 10).await;
    let a = reviewer(1);
    let b = reviewer(2);
    fx.service.join(&a).await.unwrap();
    fx.service.join(&b).await.unwrap();
    advance(&fx.clock, 11 * 60);

    let err = fx.service.leave(&a.participant_id).await.unwrap_err();
    assert!(matches!(err, VettingError::Session(SessionError::ExpiredSession)));
    assert!(!fx.service.session().active);
    assert_eq!(fx.service.stage().await, Stage::ReviewExpired);
    assert_eq!(fx.service.archive().len(), 1);

    let err = fx.service.focus_regained(&b.participant_id).await.unwrap_err();
    assert!(matches!(err, VettingError::Session(SessionError::SessionNotActive)));
    assert_eq!(fx.service.archive().len(), 1);
}

#[tokio::test]
async fn only_final_authority_ends_the_session() {
    let fx = setup_service();
    in_review(&fx, 60).await;

    assert!(fx.service.end_session(&reviewer(1)).await.unwrap().is_none());
    assert!(fx.service.session().active);

    let record = fx.service.end_session(&final_authority()).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Terminated);
    assert_eq!(fx.service.session().last_closed_reason, Some(CloseReason::EndedByAuthority));
    assert_eq!(fx.service.stage().await, Stage::ReviewReturned);
    assert!(fx.service.end_session(&final_authority()).await.unwrap().is_none());
}

#[tokio::test]
async fn author_window_lapse_moves_stage_on_tick() {
    let config = VettingConfig::default().with_deadlines(DeadlinePlan {
        author: DeadlineDuration::new(0, 1, 0),
        compiler: DeadlineDuration::days(1),
    });
    let fx = setup_service_with(config);
    assert!(fx
        .service
        .start_author_window(&final_authority())
        .await
        .unwrap()
        .is_applied());

    assert!(fx.service.tick().await.unwrap().deadline.is_none());
    advance(&fx.clock, 2 * 3600);
    let report = fx.service.tick().await.unwrap();

    assert!(report.deadline.is_some());
    assert_eq!(fx.service.stage().await, Stage::SubmittedToCompiler);
    assert!(fx.service.tick().await.unwrap().deadline.is_none());
}

#[tokio::test]
async fn scheduled_session_starts_on_tick() {
    let fx = setup_service();
    compiled(&fx).await;
    let now = fx.clock.now();
    fx.service
        .schedule_session(&final_authority(), now + Duration::minutes(10), now + Duration::minutes(70))
        .await
        .unwrap();

    assert!(fx.service.tick().await.unwrap().scheduled_start.is_none());
    advance(&fx.clock, 10 * 60);
    let report = fx.service.tick().await.unwrap();

    assert!(report.scheduled_start.unwrap().is_applied());
    assert_eq!(fx.service.stage().await, Stage::ReviewInProgress);
    assert_eq!(fx.service.session().duration_minutes, Some(60));
    assert!(fx.service.tick().await.unwrap().scheduled_start.is_none());
}

#[tokio::test]
async fn schedule_waits_until_papers_are_compiled() {
    let fx = setup_service();
    let now = fx.clock.now();
    fx.service
        .schedule_session(&final_authority(), now + Duration::minutes(10), now + Duration::minutes(70))
        .await
        .unwrap();
    let draft = PaperDraft::new("Exam paper", "blob://exam-v1");
    assert!(fx.service.submit_paper(&author(), draft).await.unwrap().is_applied());

    advance(&fx.clock, 10 * 60);
    let report = fx.service.tick().await.unwrap();
    assert_eq!(
        report.scheduled_start.and_then(|o| o.rejection()),
        Some(GuardRejection::WrongStage)
    );
    assert!(!fx.service.session().active);

    assert!(fx
        .service
        .compile_for_review(&compiler(), "ready")
        .await
        .unwrap()
        .is_applied());
    advance(&fx.clock, 60);
    let report = fx.service.tick().await.unwrap();
    assert!(report.scheduled_start.unwrap().is_applied());
    assert!(fx.service.session().active);
    assert_eq!(fx.service.session().duration_minutes, Some(59));
    assert_eq!(fx.service.stage().await, Stage::ReviewInProgress);
}

#[tokio::test]
async fn schedule_past_its_end_is_dropped() {
    let fx = setup_service();
    compiled(&fx).await;
    let now = fx.clock.now();
    fx.service
        .schedule_session(&final_authority(), now + Duration::minutes(10), now + Duration::minutes(20))
        .await
        .unwrap();

    advance(&fx.clock, 30 * 60);
    let report = fx.service.tick().await.unwrap();
    assert!(report.scheduled_start.is_none());
    assert!(!fx.service.session().active);
    assert_eq!(fx.service.session().scheduled_start, None);
    assert_eq!(fx.service.stage().await, Stage::CompiledForReview);
    let persisted = fx.store.load().await.unwrap();
    assert_eq!(persisted.session.unwrap().scheduled_by, None);
}

#[tokio::test]
async fn rejection_logs_destruction_and_restart_bumps_revision() {
    let fx = setup_service();
    in_review(&fx, 60).await;
    let chair = final_authority();
    fx.service.complete_review(&chair).await.unwrap();
    assert!(fx.service.sanitize_feedback(&chair, "anonymised").await.unwrap().is_applied());
    assert!(fx.service.complete_revision(&compiler(), "fixed").await.unwrap().is_applied());
    assert!(fx.service.forward_for_approval(&compiler()).await.unwrap().is_applied());
    assert!(fx.service.reject(&chair, "not fit").await.unwrap().is_applied());

    assert_eq!(fx.service.stage().await, Stage::Rejected);
    assert_eq!(fx.service.destruction_log().await.len(), 1);

    assert!(fx.service.restart_cycle(&chair).await.unwrap().is_applied());
    assert_eq!(fx.service.current_revision().await, 2);
    assert_eq!(fx.service.stage().await, Stage::AwaitingAuthor);
    assert!(fx.service.papers().await.is_empty());
    let latest = fx.service.ledger().await.pop().unwrap();
    assert_eq!(latest.label, "v2.1");
}

#[tokio::test]
async fn approval_is_terminal() {
    let fx = setup_service();
    in_review(&fx, 60).await;
    let chair = final_authority();
    fx.service.complete_review(&chair).await.unwrap();
    fx.service.sanitize_feedback(&chair, "ok").await.unwrap();
    fx.service.complete_revision(&compiler(), "done").await.unwrap();
    fx.service.forward_for_approval(&compiler()).await.unwrap();

    assert!(fx.service.approve(&chair, "publish").await.unwrap().is_applied());
    assert_eq!(fx.service.stage().await, Stage::Approved);
    assert!(fx
        .service
        .papers()
        .await
        .iter()
        .all(|p| p.status == PaperStatus::Approved));
    assert!(!fx.service.restart_cycle(&chair).await.unwrap().is_applied());
}

#[tokio::test]
async fn reopened_service_restores_durable_state() {
    let fx = setup_service();
    in_review(&fx, 60).await;
    let r = reviewer(1);
    fx.service.join(&r).await.unwrap();
    fx.service
        .save_comment(&r.participant_id, "sectionB", "kept", None, fx.clock.now())
        .await
        .unwrap();

    let reopened = VettingService::open(VettingConfig::default(), fx.deps()).await.unwrap();

    assert_eq!(reopened.stage().await, Stage::ReviewInProgress);
    assert_eq!(reopened.timeline().await, fx.service.timeline().await);
    assert_eq!(reopened.comments(), fx.service.comments());
    assert!(reopened.session().active);
    assert!(reopened.participants().is_empty());
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let fx = setup_service();
    let deps = || ServiceDeps {
        clock: fx.clock.clone(),
        capture: ScriptedCapture::new(),
        notifier: RecordingNotifier::new(),
        store: Arc::new(FileStore::new(dir.path())),
    };

    let first = VettingService::open(VettingConfig::default(), deps()).await.unwrap();
    first
        .submit_paper(&author(), PaperDraft::new("Exam paper", "blob://exam-v1"))
        .await
        .unwrap();
    drop(first);

    let second = VettingService::open(VettingConfig::default(), deps()).await.unwrap();
    assert_eq!(second.stage().await, Stage::SubmittedToCompiler);
    assert_eq!(second.papers().await.len(), 1);
    assert_eq!(second.ledger().await.len(), 2);
}
