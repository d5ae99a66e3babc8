//! Vetting Session - concurrent review-session coordinator
//!
//! Admits several reviewers into one proctored session, watches each of them
//! independently for rule violations, excludes participants on critical
//! violations, and keeps a shared, section-keyed comment store in sync.
//!
//! # Honest limitation
//!
//! Violation signals come from each participant's own client. They are
//! best-effort sensor readings used for monitoring and deterrence, not a
//! trust boundary. Consequences (exclusion, restriction) are decided here,
//! on the coordinator side; the client is only ever a sensor.
//!
//! # Channels
//!
//! - The comment store is the durable, last-write-wins source of truth.
//! - Typing presence and live draft text travel over a best-effort
//!   [`SignalBus`] and are never authoritative.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod archive;
pub mod broadcast;
pub mod capture;
pub mod comments;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod restriction;
pub mod session;

pub use archive::{
    Annotation, CloseReason, ParticipantRecord, ParticipationOutcome, SessionRecord, SessionStatus,
};
pub use broadcast::{SessionSignal, SignalBus};
pub use capture::{CaptureError, CaptureHandle, CaptureProvider};
pub use comments::{CommentEntry, CommentStore, DraftBoard, PresenceBoard, TypingPresence};
pub use coordinator::{
    CoordinatorSettings, JoinReceipt, ParticipantView, PollReport, SessionCoordinator,
    SessionSnapshot,
};
pub use error::SessionError;
pub use monitor::{ParticipantMonitor, Severity, SignalVerdict, ViolationKind, Warning, WarningLog};
pub use notify::{NoticeLevel, NotificationSink, TracingSink};
pub use restriction::RestrictedSet;
pub use session::{PolicyFlags, ReviewSession};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
