//! Worker registration: the installing / waiting / active lifecycle
//!
//! ```text
//! register ──► Installing ──(install ok)──► Installed (waiting)
//!                  │                              │ activate
//!                  └──(install failed)──► Redundant   ▼
//!                                          Activated ──(newer activates)──► Redundant
//! ```
//!
//! At host start a version whose generation already holds the whole manifest
//! skips straight to Activated (`Registration::start`).

use crate::fetcher::{DEFAULT_FETCH_TIMEOUT, FetchError, FetchRequest, Fetcher};
use crate::worker::{ShellWorker, WorkerError, fetch_with_timeout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strapre_proto::StoredResponse;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of one worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

struct WorkerVersion {
    id: Uuid,
    worker: Arc<ShellWorker>,
    state: WorkerState,
    state_changed_at: DateTime<Utc>,
}

impl WorkerVersion {
    fn new(worker: ShellWorker) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker: Arc::new(worker),
            state: WorkerState::Installing,
            state_changed_at: Utc::now(),
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!("Worker {} ({}): {:?} -> {:?}", self.worker.version(), self.id, self.state, state);
        self.state = state;
        self.state_changed_at = Utc::now();
    }

    fn retire(mut self) {
        self.set_state(WorkerState::Redundant);
        info!("Worker {} ({}) is redundant", self.worker.version(), self.id);
    }

    fn status(&self) -> VersionStatus {
        VersionStatus {
            id: self.id,
            version: self.worker.version().to_string(),
            state: self.state,
            state_changed_at: self.state_changed_at,
        }
    }
}

/// Snapshot of one worker version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStatus {
    pub id: Uuid,
    pub version: String,
    pub state: WorkerState,
    pub state_changed_at: DateTime<Utc>,
}

/// Snapshot of a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub scope: String,
    pub installing: Option<VersionStatus>,
    pub waiting: Option<VersionStatus>,
    pub active: Option<VersionStatus>,
}

#[derive(Default)]
struct Slots {
    installing: Option<WorkerVersion>,
    waiting: Option<WorkerVersion>,
    active: Option<WorkerVersion>,
}

/// A registered scope and the worker versions attached to it
pub struct Registration {
    scope: String,
    slots: RwLock<Slots>,
    // Used while no version is active
    network: Arc<dyn Fetcher>,
    fetch_timeout: Duration,
}

impl Registration {
    pub fn new(scope: impl Into<String>, network: Arc<dyn Fetcher>) -> Self {
        Self {
            scope: scope.into(),
            slots: RwLock::new(Slots::default()),
            network,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Deadline for requests passed straight through to the network
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Install a worker version and park it in the waiting slot
    ///
    /// A version whose tag is already waiting or active is not installed
    /// again. On failure the version becomes redundant and whatever was
    /// active keeps serving.
    pub async fn register(&self, worker: ShellWorker) -> Result<Uuid, WorkerError> {
        let (id, worker) = {
            let mut slots = self.slots.write().await;

            let existing = [slots.waiting.as_ref(), slots.active.as_ref()]
                .into_iter()
                .flatten()
                .find(|v| v.worker.version() == worker.version());
            if let Some(existing) = existing {
                info!("Worker version {} already installed, skipping install", worker.version());
                return Ok(existing.id);
            }

            if let Some(installing) = &slots.installing {
                return Err(WorkerError::State(format!(
                    "version {} is still installing",
                    installing.worker.version()
                )));
            }

            let version = WorkerVersion::new(worker);
            let handle = (version.id, version.worker.clone());
            slots.installing = Some(version);
            handle
        };

        // The lock is released while the manifest downloads so fetches keep flowing
        let result = worker.on_install().await;

        let mut slots = self.slots.write().await;
        let Some(mut version) = slots.installing.take_if(|v| v.id == id) else {
            return Err(WorkerError::State(format!("install of {} was superseded", id)));
        };

        match result {
            Ok(_) => {
                version.set_state(WorkerState::Installed);
                if let Some(previous) = slots.waiting.replace(version) {
                    previous.retire();
                }
                Ok(id)
            }
            Err(e) => {
                warn!("Discarding worker {} after failed install", version.worker.version());
                version.retire();
                Err(e)
            }
        }
    }

    /// Bring a worker version up when the host starts
    ///
    /// A version whose generation already holds the whole manifest is restored
    /// straight to active without touching the network. Anything else is
    /// installed and activated.
    pub async fn start(&self, worker: ShellWorker) -> Result<Uuid, WorkerError> {
        match worker.is_installed().await {
            Ok(true) => return self.restore(worker).await,
            Ok(false) => {}
            Err(e) => warn!("Could not inspect generation {}, reinstalling: {}", worker.version(), e),
        }

        let id = self.register(worker).await?;
        let waiting = self.slots.read().await.waiting.as_ref().map(|v| v.id);
        if waiting == Some(id) {
            self.activate().await?;
        }
        Ok(id)
    }

    async fn restore(&self, worker: ShellWorker) -> Result<Uuid, WorkerError> {
        let mut slots = self.slots.write().await;
        if let Some(active) = &slots.active {
            if active.worker.version() == worker.version() {
                return Ok(active.id);
            }
        }

        info!("Restoring installed worker version {} from its cache generation", worker.version());
        let version = WorkerVersion::new(worker);
        let id = version.id;
        Self::promote(&mut slots, version).await;
        Ok(id)
    }

    /// Promote the waiting version to active and purge older generations
    ///
    /// Fetches wait for activation to finish. A failed cleanup is logged and
    /// does not stop the version from activating.
    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        let mut slots = self.slots.write().await;
        let Some(version) = slots.waiting.take() else {
            return Err(WorkerError::State("no waiting worker to activate".to_string()));
        };
        Ok(Self::promote(&mut slots, version).await)
    }

    async fn promote(slots: &mut Slots, mut version: WorkerVersion) -> Vec<String> {
        version.set_state(WorkerState::Activating);
        if let Some(previous) = slots.active.take() {
            previous.retire();
        }

        // An install in flight already owns its generation
        let keep: Vec<String> = slots
            .installing
            .iter()
            .chain(slots.waiting.iter())
            .map(|v| v.worker.version().to_string())
            .collect();

        let deleted = match version.worker.on_activate(&keep).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Cleanup during activation of {} failed: {}", version.worker.version(), e);
                Vec::new()
            }
        };

        version.set_state(WorkerState::Activated);
        slots.active = Some(version);
        deleted
    }

    /// Route a fetch event to the active version, or straight to the network
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<StoredResponse, FetchError> {
        let active = self
            .slots
            .read()
            .await
            .active
            .as_ref()
            .map(|v| v.worker.clone());

        match active {
            Some(worker) => worker.on_fetch(request).await,
            None => {
                debug!("No active worker, passing {} through", request.url);
                fetch_with_timeout(self.network.as_ref(), request, self.fetch_timeout).await
            }
        }
    }

    /// Version tag of the active worker
    pub async fn active_version(&self) -> Option<String> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .map(|v| v.worker.version().to_string())
    }

    pub async fn status(&self) -> RegistrationStatus {
        let slots = self.slots.read().await;
        RegistrationStatus {
            scope: self.scope.clone(),
            installing: slots.installing.as_ref().map(WorkerVersion::status),
            waiting: slots.waiting.as_ref().map(WorkerVersion::status),
            active: slots.active.as_ref().map(WorkerVersion::status),
        }
    }
}
