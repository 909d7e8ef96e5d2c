use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::RemoteBackend;
use crate::connectivity::Connectivity;
use crate::events::{DomainEvent, EventBus};
use crate::models::Profile;
use crate::store::{load_json, save_json, SharedStore};
use crate::utils::format_age;

/// A cached read is served without a refetch for this long.
pub const STALENESS_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Identity the entry is valid for.
    pub owner_key: String,
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, owner_key: impl Into<String>) -> Self {
        Self {
            value,
            owner_key: owner_key.into(),
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        format_age(self.cached_at, Utc::now())
    }

    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner_key == identity
    }

    pub fn is_fresh_for(&self, identity: &str, now: DateTime<Utc>) -> bool {
        self.is_owned_by(identity)
            && now - self.cached_at < Duration::minutes(STALENESS_WINDOW_MINUTES)
    }
}

/// Profile cache with a staleness window and transient-failure fallback.
pub struct ProfileCache {
    store: SharedStore,
    backend: Arc<dyn RemoteBackend>,
    connectivity: Arc<Connectivity>,
    events: EventBus,
    /// Serializes read-modify-write of entries
    write_lock: Mutex<()>,
}

impl ProfileCache {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn RemoteBackend>,
        connectivity: Arc<Connectivity>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            events,
            write_lock: Mutex::new(()),
        }
    }

    fn key(identity: &str) -> String {
        format!("profile_{}", identity)
    }

    /// Helper to load an entry and log errors without failing
    fn load_entry(&self, identity: &str) -> Option<CacheEntry<Profile>> {
        match load_json::<CacheEntry<Profile>>(self.store.as_ref(), &Self::key(identity)) {
            Ok(Some(entry)) if entry.is_owned_by(identity) => Some(entry),
            Ok(Some(entry)) => {
                debug!(identity, owner = %entry.owner_key, "Ignoring cache entry owned by another identity");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(identity, error = %e, "Failed to load cached profile");
                None
            }
        }
    }

    /// Write `value` stamped `at`, unless an entry stamped later is already
    /// stored. Returns whether the write happened.
    fn store_entry(&self, identity: &str, value: Profile, at: DateTime<Utc>) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("Profile cache lock poisoned"))?;
        if let Some(existing) = self.load_entry(identity) {
            if existing.cached_at > at {
                debug!(identity, "Newer cache entry already stored, keeping it");
                return Ok(false);
            }
        }
        let entry = CacheEntry {
            value,
            owner_key: identity.to_string(),
            cached_at: at,
        };
        save_json(self.store.as_ref(), &Self::key(identity), &entry)?;
        Ok(true)
    }

    /// Restamp the current entry to `at`, keeping its value.
    fn extend_entry(&self, identity: &str, at: DateTime<Utc>) -> Result<Option<Profile>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("Profile cache lock poisoned"))?;
        let Some(mut entry) = self.load_entry(identity) else {
            return Ok(None);
        };
        if entry.cached_at < at {
            entry.cached_at = at;
            save_json(self.store.as_ref(), &Self::key(identity), &entry)?;
        }
        Ok(Some(entry.value))
    }

    /// Return the profile for `identity`, refetching when the entry is stale.
    ///
    /// - fresh entry: served locally
    /// - offline: the cached entry at any age, no remote call
    /// - fetch success: entry replaced and returned
    /// - transient failure: stale entry returned and its age reset, so
    ///   callers do not hammer a degraded backend
    /// - hard failure: entry cleared, `None`
    pub async fn get(&self, identity: &str) -> Option<Profile> {
        let cached = self.load_entry(identity);
        if let Some(ref entry) = cached {
            if entry.is_fresh_for(identity, Utc::now()) {
                debug!(identity, age = %entry.age_display(), "Profile cache hit");
                return Some(entry.value.clone());
            }
        }

        if !self.connectivity.is_online() {
            debug!(identity, has_cached = cached.is_some(), "Offline, serving cached profile");
            return cached.map(|entry| entry.value);
        }

        // Stamp with the request time so a `set` landing mid-fetch wins
        let requested_at = Utc::now();
        match self.backend.fetch_profile(identity).await {
            Ok(profile) => {
                let changed = cached.as_ref().map(|e| e.value != profile).unwrap_or(true);
                match self.store_entry(identity, profile.clone(), requested_at) {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Some(newer) = self.load_entry(identity) {
                            return Some(newer.value);
                        }
                    }
                    Err(e) => warn!(identity, error = %e, "Failed to persist fetched profile"),
                }
                if changed {
                    self.events.publish(DomainEvent::ProfileChanged {
                        identity: identity.to_string(),
                    });
                }
                Some(profile)
            }
            Err(e) if e.is_transient() => match self.extend_entry(identity, Utc::now()) {
                Ok(Some(value)) => {
                    warn!(identity, error = %e, "Backend degraded, serving stale profile");
                    Some(value)
                }
                Ok(None) => {
                    warn!(identity, error = %e, "Backend degraded and no cached profile");
                    None
                }
                Err(store_err) => {
                    warn!(identity, error = %store_err, "Failed to extend cached profile");
                    cached.map(|entry| entry.value)
                }
            },
            Err(e) => {
                if e.is_not_found() {
                    info!(identity, "Profile no longer exists, clearing cache entry");
                } else {
                    warn!(identity, error = %e, "Profile fetch rejected, clearing cache entry");
                }
                if let Err(e) = self.invalidate(identity) {
                    warn!(identity, error = %e, "Failed to clear cached profile");
                }
                None
            }
        }
    }

    /// Overwrite the entry for `identity`, stamped now.
    pub fn set(&self, identity: &str, value: Profile) -> Result<()> {
        self.store_entry(identity, value, Utc::now())?;
        self.events.publish(DomainEvent::ProfileChanged {
            identity: identity.to_string(),
        });
        Ok(())
    }

    /// Local-only check for a fresh entry; never touches the network.
    pub fn is_present_and_fresh(&self, identity: &str) -> bool {
        self.load_entry(identity)
            .map(|entry| entry.is_fresh_for(identity, Utc::now()))
            .unwrap_or(false)
    }

    /// Raw entry for diagnostics and optimistic updates.
    pub fn peek(&self, identity: &str) -> Option<CacheEntry<Profile>> {
        self.load_entry(identity)
    }

    pub fn invalidate(&self, identity: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("Profile cache lock poisoned"))?;
        self.store.remove_key(&Self::key(identity))
    }
}

// ============================================================================
// Tests
// ============================================================================
