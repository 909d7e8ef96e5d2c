//! Service wiring for the host application.
//!
//! `Portal` owns the single instance of every sync-engine service for the
//! lifetime of the application and exposes the operations page components
//! call: session checks, profile reads, offline-capable writes, and the
//! mount/unmount lifecycle that drives background work.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, HttpBackend, RemoteBackend};
use crate::auth::Session;
use crate::cache::ProfileCache;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::events::{DomainEvent, EventBus};
use crate::models::{CommentRecord, ContentRecord, NewComment, NewContent, Profile, ProfileUpdate};
use crate::queue::{MutationKind, PendingMutation, PendingQueues};
use crate::scheduler::{BackgroundStatus, TaskScheduler};
use crate::store::{FileStore, SharedStore};
use crate::sync::{SyncReport, SyncStatus, Synchronizer};

/// Name of the periodic connectivity re-check task
pub const CONNECTIVITY_TASK: &str = "connectivity-check";

/// Result of a write that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The backend confirmed the write
    Applied(T),
    /// The write is queued and will be sent on the next sync
    Queued(PendingMutation),
}

impl<T> WriteOutcome<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued(_))
    }
}

/// Errors a write surfaces to the UI. Transient failures never appear here.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Profile update changes nothing")]
    EmptyUpdate,

    #[error(transparent)]
    Rejected(ApiError),

    #[error("Failed to queue write: {0}")]
    Storage(#[from] anyhow::Error),
}

pub struct Portal {
    config: Config,
    backend: Arc<dyn RemoteBackend>,
    events: EventBus,
    connectivity: Arc<Connectivity>,
    cache: Arc<ProfileCache>,
    queues: Arc<PendingQueues>,
    sync: Arc<Synchronizer>,
    scheduler: TaskScheduler,
    session: Mutex<Session>,
    startup_sync: Mutex<Option<JoinHandle<()>>>,
}

impl Portal {
    /// Wire every service around `store` and `backend`.
    ///
    /// An unreadable saved session is logged and the portal starts signed out.
    pub fn new(config: Config, store: SharedStore, backend: Arc<dyn RemoteBackend>) -> Self {
        let events = EventBus::new();
        let connectivity = Arc::new(Connectivity::new(true, events.clone()));
        let cache = Arc::new(ProfileCache::new(
            store.clone(),
            backend.clone(),
            connectivity.clone(),
            events.clone(),
        ));
        let queues = Arc::new(PendingQueues::new(
            store.clone(),
            backend.clone(),
            cache.clone(),
            events.clone(),
        ));
        let sync = Arc::new(Synchronizer::new(
            queues.clone(),
            connectivity.clone(),
            events.clone(),
        ));
        let scheduler = TaskScheduler::new(config.tick_interval());

        let mut session = Session::new(store);
        match session.load() {
            Ok(true) => debug!(identity = ?session.identity(), "Session restored"),
            Ok(false) => debug!("No saved session"),
            Err(e) => warn!(error = %e, "Failed to load session, starting signed out"),
        }

        Self {
            config,
            backend,
            events,
            connectivity,
            cache,
            queues,
            sync,
            scheduler,
            session: Mutex::new(session),
            startup_sync: Mutex::new(None),
        }
    }

    /// Build a portal backed by files under the configured data directory
    /// and the HTTP backend at `api_base_url`.
    pub fn from_config(config: Config) -> Result<Self> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No backend URL configured (set FELLOWSHIP_API_URL)"))?;
        let mut backend = HttpBackend::new(&base_url, config.request_timeout())?;
        if let Some(ref token) = config.api_token {
            backend.set_token(token.clone());
        }

        let data_dir = config.data_dir()?;
        let store = FileStore::new(data_dir.clone())
            .with_context(|| format!("Failed to open store at {}", data_dir.display()))?;
        debug!(?data_dir, %base_url, "Portal configured");

        Ok(Self::new(config, Arc::new(store), Arc::new(backend)))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn cache(&self) -> &Arc<ProfileCache> {
        &self.cache
    }

    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub fn sign_in(&self, identity: &str) -> Result<()> {
        self.session().sign_in(identity)?;
        info!(identity, "Signed in");
        self.events.publish(DomainEvent::AuthStateChanged {
            identity: Some(identity.to_string()),
        });
        Ok(())
    }

    /// Sign out and drop the cached profile. Pending writes stay queued.
    pub fn sign_out(&self) -> Result<()> {
        let previous = self.session().clear()?;
        if let Some(ref identity) = previous {
            self.cache.invalidate(identity)?;
            info!(identity = %identity, "Signed out");
        }
        self.events.publish(DomainEvent::AuthStateChanged { identity: None });
        Ok(())
    }

    pub fn current_identity(&self) -> Option<String> {
        self.session().identity().map(str::to_string)
    }

    /// Fast local check used to decide what to render; never blocks on the network.
    pub fn is_session_active(&self) -> bool {
        self.current_identity()
            .map(|identity| self.cache.is_present_and_fresh(&identity))
            .unwrap_or(false)
    }

    pub async fn current_profile(&self) -> Option<Profile> {
        let identity = self.current_identity()?;
        self.cache.get(&identity).await
    }

    fn require_identity(&self) -> Result<String, WriteError> {
        self.current_identity().ok_or(WriteError::NotSignedIn)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes go through the queue while offline, and also while older writes
    /// of the same kind are still queued so they cannot overtake them.
    fn must_queue(&self, kind: MutationKind) -> bool {
        if !self.connectivity.is_online() {
            return true;
        }
        match self.queues.list_pending(kind) {
            Ok(pending) => !pending.is_empty(),
            Err(e) => {
                warn!(kind = kind.label(), error = %e, "Failed to read pending queue");
                false
            }
        }
    }

    fn queue(
        &self,
        kind: MutationKind,
        payload: Value,
        owner: &str,
    ) -> Result<PendingMutation, WriteError> {
        let mutation = self.queues.enqueue(kind, payload, owner)?;
        if self.connectivity.is_online() {
            self.sync.spawn_sync();
        }
        Ok(mutation)
    }

    /// Queue on transient failure, surface anything else.
    fn fall_back(
        &self,
        kind: MutationKind,
        payload: Value,
        owner: &str,
        error: ApiError,
    ) -> Result<PendingMutation, WriteError> {
        if error.is_transient() {
            warn!(kind = kind.label(), error = %error, "Backend degraded, queueing write");
            self.queues
                .enqueue(kind, payload, owner)
                .map_err(WriteError::from)
        } else {
            Err(WriteError::Rejected(error))
        }
    }

    pub async fn update_profile(
        &self,
        update: &ProfileUpdate,
    ) -> Result<WriteOutcome<Profile>, WriteError> {
        let owner = self.require_identity()?;
        if update.is_empty() {
            return Err(WriteError::EmptyUpdate);
        }
        let payload = update.to_payload()?;
        let kind = MutationKind::ProfileUpdate;

        let outcome = if self.must_queue(kind) {
            WriteOutcome::Queued(self.queue(kind, payload, &owner)?)
        } else {
            match self.backend.update_profile(&owner, &payload).await {
                Ok(profile) => WriteOutcome::Applied(profile),
                Err(e) => WriteOutcome::Queued(self.fall_back(kind, payload, &owner, e)?),
            }
        };

        match outcome {
            WriteOutcome::Applied(ref profile) => {
                if let Err(e) = self.cache.set(&owner, profile.clone()) {
                    warn!(error = %e, "Failed to cache updated profile");
                }
            }
            WriteOutcome::Queued(ref mutation) => {
                self.apply_optimistically(&owner, &mutation.payload)
            }
        }
        if update.changes_avatar() {
            self.events.publish(DomainEvent::AvatarChanged { identity: owner });
        }
        Ok(outcome)
    }

    /// Show a queued profile update locally before the backend confirms it.
    fn apply_optimistically(&self, owner: &str, patch: &Value) {
        let base = self
            .cache
            .peek(owner)
            .map(|entry| entry.value)
            .unwrap_or_else(|| Profile::new(owner));
        match base.apply_patch(patch) {
            Ok(patched) => {
                if let Err(e) = self.cache.set(owner, patched) {
                    warn!(error = %e, "Failed to cache optimistic profile");
                }
            }
            Err(e) => warn!(error = %e, "Failed to apply profile patch locally"),
        }
    }

    pub async fn create_content(
        &self,
        content: &NewContent,
    ) -> Result<WriteOutcome<ContentRecord>, WriteError> {
        let owner = self.require_identity()?;
        let payload = serde_json::to_value(content).map_err(anyhow::Error::from)?;
        let kind = MutationKind::ContentCreate;

        if self.must_queue(kind) {
            return Ok(WriteOutcome::Queued(self.queue(kind, payload, &owner)?));
        }
        match self.backend.create_content(&owner, &payload).await {
            Ok(record) => Ok(WriteOutcome::Applied(record)),
            Err(e) => Ok(WriteOutcome::Queued(self.fall_back(kind, payload, &owner, e)?)),
        }
    }

    pub async fn create_comment(
        &self,
        comment: &NewComment,
    ) -> Result<WriteOutcome<CommentRecord>, WriteError> {
        let owner = self.require_identity()?;
        let payload = serde_json::to_value(comment).map_err(anyhow::Error::from)?;
        let kind = MutationKind::CommentCreate;

        if self.must_queue(kind) {
            return Ok(WriteOutcome::Queued(self.queue(kind, payload, &owner)?));
        }
        match self.backend.create_comment(&owner, &payload).await {
            Ok(record) => Ok(WriteOutcome::Applied(record)),
            Err(e) => Ok(WriteOutcome::Queued(self.fall_back(kind, payload, &owner, e)?)),
        }
    }

    // =========================================================================
    // Sync and connectivity
    // =========================================================================

    /// Platform connectivity signal. A restore starts a background sync,
    /// whose handle is returned.
    pub fn set_online(&self, online: bool) -> Option<JoinHandle<Option<SyncReport>>> {
        if self.connectivity.set_online(online) {
            Some(self.sync.spawn_sync())
        } else {
            None
        }
    }

    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.sync.sync_all().await
    }

    pub fn list_pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
        self.queues.list_pending(kind)
    }

    pub fn pending_counts(&self) -> Vec<(MutationKind, usize)> {
        self.queues.pending_counts()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Application mounted: start background work. Safe to call twice.
    pub fn mount(&self) {
        self.register_connectivity_check();
        self.scheduler.start();

        let mut startup = self
            .startup_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if startup.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *startup = Some(self.sync.schedule_startup_sync(self.config.startup_sync_delay()));
    }

    /// Application about to unmount: stop background work. Safe to call twice.
    pub fn unmount(&self) {
        self.scheduler.stop();
        self.scheduler.unregister_task(CONNECTIVITY_TASK);
        if let Some(handle) = self
            .startup_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Re-probe the backend periodically; correct the connectivity flag and
    /// drain whatever is queued.
    fn register_connectivity_check(&self) {
        let backend = Arc::clone(&self.backend);
        let connectivity = Arc::clone(&self.connectivity);
        let sync = Arc::clone(&self.sync);

        self.scheduler
            .register_task(CONNECTIVITY_TASK, &self.config.connectivity_check, move || {
                let backend = Arc::clone(&backend);
                let connectivity = Arc::clone(&connectivity);
                let sync = Arc::clone(&sync);
                async move {
                    match backend.ping().await {
                        Ok(()) => {
                            connectivity.set_online(true);
                        }
                        Err(e) if e.is_transient() => {
                            debug!(error = %e, "Connectivity check failed");
                            connectivity.set_online(false);
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                    sync.sync_all().await;
                    Ok(())
                }
            });
    }

    /// Scheduler state and task labels for the diagnostics page.
    pub fn background_status(&self) -> BackgroundStatus {
        self.scheduler.status()
    }
}

impl Drop for Portal {
    fn drop(&mut self) {
        self.unmount();
    }
}

// ============================================================================
// Tests
// ============================================================================
