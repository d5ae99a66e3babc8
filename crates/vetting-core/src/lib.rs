//! Vetting Core - paper vetting service
//!
//! Ties the custodianship workflow to proctored review sessions. The
//! [`VettingService`] owns one [`vetting_workflow::WorkflowEngine`] and one
//! [`vetting_session::SessionCoordinator`]; opening a session begins
//! review, and closing it (by the final authority or by expiry) concludes
//! it. State is written through a [`StateStore`] after every durable change.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vetting_core::{MemoryStore, ServiceDeps, VettingConfig, VettingService};
//! use vetting_session::TracingSink;
//! use vetting_workflow::SystemClock;
//! # use vetting_session::CaptureProvider;
//! # async fn run(capture: Arc<dyn CaptureProvider>) -> Result<(), vetting_core::VettingError> {
//! let service = VettingService::open(
//!     VettingConfig::load("vetting.toml")?,
//!     ServiceDeps {
//!         clock: Arc::new(SystemClock),
//!         capture,
//!         notifier: Arc::new(TracingSink),
//!         store: Arc::new(MemoryStore::new()),
//!     },
//! )
//! .await?;
//! service.tick().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod persistence;
pub mod service;
pub mod telemetry;
pub mod test_harness;

pub use config::{LogConfig, VettingConfig};
pub use error::{ConfigError, StoreError, VettingError};
pub use persistence::{FileStore, MemoryStore, PersistedState, StateKey, StatePatch, StateStore};
pub use service::{ServiceDeps, TickReport, VettingService};
pub use telemetry::init_tracing;

pub use test_harness::{run_simulator, SimulatorConfig, TestHarness};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
