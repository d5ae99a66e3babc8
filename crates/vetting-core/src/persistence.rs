//! Durable persistence boundary
//!
//! The service saves partial state after every mutation: the workflow
//! snapshot and the session snapshot are written independently. Two stores
//! ship here, an in-memory one backed by `DashMap` and a JSON-file one for
//! single-node deployments.

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;
use tracing::debug;
use vetting_session::SessionSnapshot;
use vetting_workflow::WorkflowSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKey {
    Workflow,
    Session,
}

impl StateKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Session => "session",
        }
    }
}

/// One independently saved slice of state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatePatch {
    Workflow(WorkflowSnapshot),
    Session(SessionSnapshot),
}

impl StatePatch {
    #[must_use]
    pub const fn key(&self) -> StateKey {
        match self {
            Self::Workflow(_) => StateKey::Workflow,
            Self::Session(_) => StateKey::Session,
        }
    }

    fn to_json(&self) -> Result<serde_json::Value, StoreError> {
        Ok(match self {
            Self::Workflow(s) => serde_json::to_value(s)?,
            Self::Session(s) => serde_json::to_value(s)?,
        })
    }
}

/// Everything that was saved, if anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub workflow: Option<WorkflowSnapshot>,
    pub session: Option<SessionSnapshot>,
}

impl PersistedState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workflow.is_none() && self.session.is_none()
    }
}

/// Durable store used by the service
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
    async fn load(&self) -> Result<PersistedState, StoreError>;

    async fn save(&self, patch: StatePatch) -> Result<(), StoreError>;
}

fn decode<T: DeserializeOwned>(value: Option<serde_json::Value>) -> Result<Option<T>, StoreError> {
    value.map(serde_json::from_value).transpose().map_err(StoreError::from)
}

/// In-memory store. Values are kept as JSON so a load goes through the
/// same serialization path as a real store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<StateKey, serde_json::Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: StateKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Raw stored JSON for a key
    #[must_use]
    pub fn raw(&self, key: StateKey) -> Option<serde_json::Value> {
        self.slots.get(&key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(PersistedState {
            workflow: decode(self.raw(StateKey::Workflow))?,
            session: decode(self.raw(StateKey::Session))?,
        })
    }

    async fn save(&self, patch: StatePatch) -> Result<(), StoreError> {
        let key = patch.key();
        self.slots.insert(key, patch.to_json()?);
        debug!(key = key.as_str(), "state saved");
        Ok(())
    }
}

/// One JSON file per state key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: StateKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    async fn read(&self, key: StateKey) -> Result<Option<serde_json::Value>, StoreError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<PersistedState, StoreError> {
        let (workflow, session) =
            futures::try_join!(self.read(StateKey::Workflow), self.read(StateKey::Session))?;
        Ok(PersistedState {
            workflow: decode(workflow)?,
            session: decode(session)?,
        })
    }

    async fn save(&self, patch: StatePatch) -> Result<(), StoreError> {
        let key = patch.key();
        let bytes = serde_json::to_vec_pretty(&patch.to_json()?)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        // write-then-rename so a crash never leaves a torn file
        let tmp = self.dir.join(format!("{}.json.tmp", key.as_str()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.path(key)).await?;
        debug!(key = key.as_str(), dir = %self.dir.display(), "state saved");
        Ok(())
    }
}
