//! Testing utilities for the vetting workspace
//!
//! Shared fakes for the capture and notification boundaries, actor
//! fixtures, and setup helpers for the coordinator and the service.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use ulid::Ulid;
use vetting_core::{MemoryStore, ServiceDeps, VettingConfig, VettingService};
use vetting_session::{
    CaptureError, CaptureHandle, CaptureProvider, CoordinatorSettings, NoticeLevel,
    NotificationSink, SessionCoordinator,
};
use vetting_workflow::{Actor, ManualClock, ParticipantId, Role};

/// Capture provider whose answers are scripted per participant.
///
/// Tracks every handle it has handed out so tests can assert that nothing
/// is left open.
#[derive(Debug, Default)]
pub struct ScriptedCapture {
    denied: Mutex<BTreeSet<ParticipantId>>,
    open: Mutex<BTreeMap<Ulid, ParticipantId>>,
    acquired: AtomicUsize,
    fail_release: AtomicBool,
}

impl ScriptedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, id: impl Into<ParticipantId>) {
        self.denied.lock().insert(id.into());
    }

    pub fn allow(&self, id: &ParticipantId) {
        self.denied.lock().remove(id);
    }

    /// Make every release report a device failure. The handle is still
    /// dropped, as a dead device would be.
    pub fn fail_releases(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn open_handles(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_open_for(&self, id: &ParticipantId) -> bool {
        self.open.lock().values().any(|p| p == id)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureProvider for ScriptedCapture {
    async fn acquire(&self, participant: &ParticipantId) -> Result<CaptureHandle, CaptureError> {
        if self.denied.lock().contains(participant) {
            return Err(CaptureError::Denied(format!("{participant} declined the prompt")));
        }
        let handle = CaptureHandle::new(participant.clone());
        self.open.lock().insert(handle.id, participant.clone());
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn release(&self, handle: CaptureHandle) -> Result<(), CaptureError> {
        let removed = self.open.lock().remove(&handle.id);
        if removed.is_none() {
            return Err(CaptureError::AlreadyReleased(handle.id));
        }
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(CaptureError::Device("device went away".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub target: ParticipantId,
    pub title: String,
    pub message: String,
    pub level: NoticeLevel,
}

/// Notification sink that keeps everything it is sent
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn for_target(&self, id: &ParticipantId) -> Vec<Notice> {
        self.notices
            .lock()
            .iter()
            .filter(|n| &n.target == id)
            .cloned()
            .collect()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices.lock().iter().filter(|n| n.level == level).count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, target: &ParticipantId, title: &str, message: &str, level: NoticeLevel) {
        self.notices.lock().push(Notice {
            target: target.clone(),
            title: title.to_string(),
            message: message.to_string(),
            level,
        });
    }
}

// -------------------------------------------------------------------------
// Actors
// -------------------------------------------------------------------------

pub fn author() -> Actor {
    Actor::new("author-1", "Avery Author", [Role::Author])
}

pub fn compiler() -> Actor {
    Actor::new("compiler-1", "Casey Compiler", [Role::Compiler])
}

pub fn final_authority() -> Actor {
    Actor::new("chair-1", "Frankie Chair", [Role::FinalAuthority])
}

pub fn reviewer(n: u32) -> Actor {
    Actor::new(format!("reviewer-{n}"), format!("Reviewer {n}"), [Role::Reviewer])
}

// -------------------------------------------------------------------------
// Setup
// -------------------------------------------------------------------------

/// Manual clock pinned to a fixed instant
pub fn fixed_clock() -> Arc<ManualClock> {
    let start = Utc
        .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Arc::new(ManualClock::new(start))
}

pub fn advance(clock: &ManualClock, seconds: i64) {
    clock.advance(Duration::seconds(seconds));
}

pub struct CoordinatorFixture {
    pub coordinator: SessionCoordinator,
    pub capture: Arc<ScriptedCapture>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub fn setup_coordinator() -> CoordinatorFixture {
    setup_coordinator_with(CoordinatorSettings::default())
}

pub fn setup_coordinator_with(settings: CoordinatorSettings) -> CoordinatorFixture {
    let capture = ScriptedCapture::new();
    let notifier = RecordingNotifier::new();
    let clock = fixed_clock();
    let coordinator =
        SessionCoordinator::new(capture.clone(), notifier.clone(), clock.clone(), settings);
    CoordinatorFixture {
        coordinator,
        capture,
        notifier,
        clock,
    }
}

pub struct ServiceFixture {
    pub service: VettingService,
    pub capture: Arc<ScriptedCapture>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
}

impl ServiceFixture {
    pub fn deps(&self) -> ServiceDeps {
        ServiceDeps {
            clock: self.clock.clone(),
            capture: self.capture.clone(),
            notifier: self.notifier.clone(),
            store: self.store.clone(),
        }
    }
}

pub fn setup_service() -> ServiceFixture {
    setup_service_with(VettingConfig::default())
}

pub fn setup_service_with(config: VettingConfig) -> ServiceFixture {
    let capture = ScriptedCapture::new();
    let notifier = RecordingNotifier::new();
    let clock = fixed_clock();
    let store = Arc::new(MemoryStore::new());
    let service = VettingService::new(
        config,
        ServiceDeps {
            clock: clock.clone(),
            capture: capture.clone(),
            notifier: notifier.clone(),
            store: store.clone(),
        },
    );
    ServiceFixture {
        service,
        capture,
        notifier,
        clock,
        store,
    }
}

/// Route test logs through the test writer; safe to call repeatedly
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}
