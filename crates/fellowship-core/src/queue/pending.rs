use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ErrorClass, RemoteBackend};
use crate::cache::ProfileCache;
use crate::events::{DomainEvent, EventBus};
use crate::store::{save_json, SharedStore};
use crate::utils::InFlightFlag;

use super::{MutationKind, PendingMutation};

/// Outcome of one drain pass over a single kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Confirmed by the backend and removed
    pub applied: usize,
    /// Older than the max age, removed unapplied
    pub discarded: usize,
    /// Still queued after this pass
    pub remaining: usize,
    /// Another drain of this kind was already running; nothing was attempted
    pub skipped: bool,
    /// The queue could not be read, so its contents are unknown
    pub failed: bool,
}

/// Durable per-kind FIFO queues of writes awaiting the backend.
pub struct PendingQueues {
    store: SharedStore,
    backend: Arc<dyn RemoteBackend>,
    cache: Arc<ProfileCache>,
    events: EventBus,
    /// Serializes read-modify-write of queue records
    write_lock: Mutex<()>,
    /// One drain per kind at a time, indexed like `MutationKind::ALL`
    draining: [InFlightFlag; 3],
}

impl PendingQueues {
    pub fn new(
        store: SharedStore,
        backend: Arc<dyn RemoteBackend>,
        cache: Arc<ProfileCache>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            backend,
            cache,
            events,
            write_lock: Mutex::new(()),
            draining: Default::default(),
        }
    }

    fn key(kind: MutationKind) -> String {
        format!("pending_{}", kind.label())
    }

    fn corrupt_key(kind: MutationKind) -> String {
        format!("pending_{}_corrupt", kind.label())
    }

    fn draining(&self, kind: MutationKind) -> &InFlightFlag {
        let index = match kind {
            MutationKind::ProfileUpdate => 0,
            MutationKind::ContentCreate => 1,
            MutationKind::CommentCreate => 2,
        };
        &self.draining[index]
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("Pending queue lock poisoned"))
    }

    /// Read the queue for `kind`. Caller holds the write lock.
    ///
    /// An unreadable record is moved to `pending_<kind>_corrupt` and the
    /// queue restarts empty, so one bad write cannot block the kind.
    fn load_queue(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
        let key = Self::key(kind);
        let Some(contents) = self.store.read_key(&key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&contents) {
            Ok(queue) => Ok(queue),
            Err(e) => {
                let aside = Self::corrupt_key(kind);
                warn!(kind = kind.label(), error = %e, moved_to = %aside, "Pending queue unreadable, starting a fresh queue");
                self.store.write_key(&aside, &contents)?;
                self.store.remove_key(&key)?;
                Ok(Vec::new())
            }
        }
    }

    /// Queue a write and persist it before returning.
    pub fn enqueue(
        &self,
        kind: MutationKind,
        payload: Value,
        owner_key: &str,
    ) -> Result<PendingMutation> {
        let mutation = PendingMutation::new(kind, payload, owner_key);
        self.append(mutation.clone())?;
        info!(kind = kind.label(), id = %mutation.id, owner = owner_key, "Mutation queued for sync");
        self.events.publish(DomainEvent::MutationQueued {
            kind,
            id: mutation.id.clone(),
        });
        Ok(mutation)
    }

    pub(crate) fn append(&self, mutation: PendingMutation) -> Result<()> {
        let _guard = self.lock()?;
        let key = Self::key(mutation.kind);
        let mut queue = self.load_queue(mutation.kind)?;
        queue.push(mutation);
        save_json(self.store.as_ref(), &key, &queue)
    }

    /// Remove an entry by id. Returns whether it was present.
    fn remove(&self, kind: MutationKind, id: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let key = Self::key(kind);
        let mut queue = self.load_queue(kind)?;
        let before = queue.len();
        queue.retain(|m| m.id != id);
        if queue.len() == before {
            return Ok(false);
        }
        if queue.is_empty() {
            self.store.remove_key(&key)?;
        } else {
            save_json(self.store.as_ref(), &key, &queue)?;
        }
        Ok(true)
    }

    /// Queued entries for `kind`, oldest first.
    pub fn list_pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
        let _guard = self.lock()?;
        self.load_queue(kind)
    }

    /// Queue length per kind, for "pending sync" badges.
    pub fn pending_counts(&self) -> Vec<(MutationKind, usize)> {
        MutationKind::ALL
            .into_iter()
            .map(|kind| {
                let count = match self.list_pending(kind) {
                    Ok(queue) => queue.len(),
                    Err(e) => {
                        warn!(kind = kind.label(), error = %e, "Failed to read pending queue");
                        0
                    }
                };
                (kind, count)
            })
            .collect()
    }

    pub fn total_pending(&self) -> usize {
        self.pending_counts().iter().map(|(_, count)| count).sum()
    }

    /// Try every queued entry of `kind` once, in creation order.
    ///
    /// Expired entries are dropped without a remote call. A failed entry stays
    /// queued unchanged and the pass moves on to the next one. Entries queued
    /// after the pass starts wait for the next drain.
    pub async fn drain(&self, kind: MutationKind) -> DrainReport {
        let Some(_draining) = self.draining(kind).try_acquire() else {
            debug!(kind = kind.label(), "Drain already in flight, skipping");
            let remaining = self.list_pending(kind).map(|q| q.len()).unwrap_or(0);
            return DrainReport {
                remaining,
                skipped: true,
                ..Default::default()
            };
        };

        let batch = match self.list_pending(kind) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(kind = kind.label(), error = %e, "Failed to read pending queue, nothing drained");
                return DrainReport {
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let mut report = DrainReport::default();
        let now = Utc::now();

        for mutation in batch {
            if mutation.is_expired(now) {
                match self.remove(kind, &mutation.id) {
                    Ok(_) => {
                        info!(kind = kind.label(), id = %mutation.id, created_at = %mutation.created_at, "Discarding expired mutation");
                        report.discarded += 1;
                        self.events.publish(DomainEvent::MutationDiscarded {
                            kind,
                            id: mutation.id,
                        });
                    }
                    Err(e) => {
                        warn!(kind = kind.label(), id = %mutation.id, error = %e, "Failed to discard expired mutation");
                        report.remaining += 1;
                    }
                }
                continue;
            }

            match self.apply(&mutation).await {
                Ok(()) => match self.remove(kind, &mutation.id) {
                    Ok(_) => {
                        debug!(kind = kind.label(), id = %mutation.id, "Mutation applied");
                        report.applied += 1;
                        self.events.publish(DomainEvent::MutationApplied {
                            kind,
                            id: mutation.id,
                        });
                    }
                    Err(e) => {
                        // Applied remotely but still queued; it will be resent next drain
                        warn!(kind = kind.label(), id = %mutation.id, error = %e, "Failed to dequeue applied mutation");
                        report.remaining += 1;
                    }
                },
                Err(e) => {
                    match e.classify() {
                        ErrorClass::Transient => {
                            debug!(kind = kind.label(), id = %mutation.id, error = %e, "Mutation not applied, will retry")
                        }
                        ErrorClass::Hard => {
                            warn!(kind = kind.label(), id = %mutation.id, error = %e, "Backend rejected queued mutation")
                        }
                    }
                    report.remaining += 1;
                }
            }
        }

        info!(
            kind = kind.label(),
            applied = report.applied,
            discarded = report.discarded,
            remaining = report.remaining,
            "Drain pass finished"
        );
        report
    }

    /// Send one mutation to the backend and reconcile the cache on success.
    async fn apply(&self, mutation: &PendingMutation) -> Result<(), ApiError> {
        let owner = mutation.owner_key.as_str();
        match mutation.kind {
            MutationKind::ProfileUpdate => {
                let profile = self.backend.update_profile(owner, &mutation.payload).await?;
                if let Err(e) = self.cache.set(owner, profile) {
                    warn!(owner, error = %e, "Failed to cache confirmed profile");
                }
            }
            MutationKind::ContentCreate => {
                let record = self.backend.create_content(owner, &mutation.payload).await?;
                debug!(local_id = %mutation.id, remote_id = %record.id, "Content created");
            }
            MutationKind::CommentCreate => {
                let record = self.backend.create_comment(owner, &mutation.payload).await?;
                debug!(local_id = %mutation.id, remote_id = %record.id, "Comment created");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{Failure, MockBackend};
    use crate::connectivity::Connectivity;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        queues: Arc<PendingQueues>,
        store: SharedStore,
        backend: Arc<MockBackend>,
        cache: Arc<ProfileCache>,
        events: EventBus,
    }

    fn fixture(backend: MockBackend) -> Fixture {
        let events = EventBus::new();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let backend = Arc::new(backend);
        let connectivity = Arc::new(Connectivity::new(true, events.clone()));
        let cache = Arc::new(ProfileCache::new(
            store.clone(),
            backend.clone(),
            connectivity,
            events.clone(),
        ));
        let queues = Arc::new(PendingQueues::new(
            store.clone(),
            backend.clone(),
            cache.clone(),
            events.clone(),
        ));
        Fixture { queues, store, backend, cache, events }
    }

    fn comment(body: &str) -> Value {
        json!({"targetId": "content-1", "body": body})
    }

    #[test]
    fn test_list_pending_preserves_enqueue_order() {
        let f = fixture(MockBackend::new());
        let ids: Vec<String> = ["one", "two", "three"]
            .iter()
            .map(|body| {
                f.queues
                    .enqueue(MutationKind::CommentCreate, comment(body), "u1")
                    .unwrap()
                    .id
            })
            .collect();

        let listed: Vec<String> = f
            .queues
            .list_pending(MutationKind::CommentCreate)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, ids);
        assert!(f.queues.list_pending(MutationKind::ContentCreate).unwrap().is_empty());
    }

    #[test]
    fn test_pending_counts_per_kind() {
        let f = fixture(MockBackend::new());
        f.queues.enqueue(MutationKind::CommentCreate, comment("a"), "u1").unwrap();
        f.queues.enqueue(MutationKind::CommentCreate, comment("b"), "u1").unwrap();
        f.queues
            .enqueue(MutationKind::ProfileUpdate, json!({"bio": "hi"}), "u1")
            .unwrap();

        let counts = f.queues.pending_counts();
        assert_eq!(
            counts,
            vec![
                (MutationKind::ProfileUpdate, 1),
                (MutationKind::ContentCreate, 0),
                (MutationKind::CommentCreate, 2),
            ]
        );
        assert_eq!(f.queues.total_pending(), 3);
    }

    #[tokio::test]
    async fn test_drain_applies_in_order_and_empties_queue() {
        let f = fixture(MockBackend::new());
        f.queues.enqueue(MutationKind::CommentCreate, comment("first"), "u1").unwrap();
        f.queues.enqueue(MutationKind::CommentCreate, comment("second"), "u1").unwrap();

        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report, DrainReport { applied: 2, ..Default::default() });

        let bodies: Vec<String> = f.backend.comments().into_iter().map(|c| c.body).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert!(f.queues.list_pending(MutationKind::CommentCreate).unwrap().is_empty());

        // Second drain with nothing new is a no-op
        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report, DrainReport::default());
        assert_eq!(f.backend.calls().create_comment, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_failed_entry_unchanged() {
        let f = fixture(MockBackend::new());
        let first = f.queues.enqueue(MutationKind::CommentCreate, comment("first"), "u1").unwrap();
        f.queues.enqueue(MutationKind::CommentCreate, comment("second"), "u1").unwrap();
        f.backend.fail_next(Failure::Unreachable);

        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.remaining, 1);

        let left = f.queues.list_pending(MutationKind::CommentCreate).unwrap();
        assert_eq!(left, vec![first.clone()]);

        // Retry resends the identical payload
        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report.applied, 1);
        let comments = f.backend.comments();
        assert_eq!(comments.last().unwrap().body, "first");
    }

    #[tokio::test]
    async fn test_hard_rejection_stays_queued() {
        let f = fixture(MockBackend::new());
        f.queues
            .enqueue(MutationKind::ContentCreate, json!({"kind": "event", "title": "Retreat"}), "u1")
            .unwrap();
        f.backend.fail_next(Failure::Conflict);

        let report = f.queues.drain(MutationKind::ContentCreate).await;
        assert_eq!(report.remaining, 1);
        assert_eq!(f.queues.list_pending(MutationKind::ContentCreate).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_mutation_discarded_without_remote_call() {
        let f = fixture(MockBackend::new());
        let mut rx = f.events.subscribe();
        let mut stale = PendingMutation::new(MutationKind::CommentCreate, comment("old"), "u1");
        stale.created_at = Utc::now() - Duration::days(8);
        f.queues.append(stale.clone()).unwrap();

        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report, DrainReport { discarded: 1, ..Default::default() });
        assert_eq!(f.backend.calls().create_comment, 0);
        assert!(f.queues.list_pending(MutationKind::CommentCreate).unwrap().is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            DomainEvent::MutationDiscarded { kind: MutationKind::CommentCreate, id: stale.id }
        );

        // Never comes back
        f.queues.drain(MutationKind::CommentCreate).await;
        assert!(f.queues.list_pending(MutationKind::CommentCreate).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_applied_profile_update_refreshes_cache() {
        let f = fixture(MockBackend::new());
        f.queues
            .enqueue(MutationKind::ProfileUpdate, json!({"displayName": "Ana"}), "u1")
            .unwrap();

        f.queues.drain(MutationKind::ProfileUpdate).await;

        let entry = f.cache.peek("u1").unwrap();
        assert_eq!(entry.value.display_name.as_deref(), Some("Ana"));
        assert!(f.cache.is_present_and_fresh("u1"));
        assert_eq!(f.backend.profile("u1").unwrap().display_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_unreadable_queue_is_moved_aside() {
        let f = fixture(MockBackend::new());
        f.store.write_key("pending_comment_create", "{truncated").unwrap();

        // Offline writes still queue
        let queued = f
            .queues
            .enqueue(MutationKind::CommentCreate, comment("after crash"), "u1")
            .unwrap();
        let pending = f.queues.list_pending(MutationKind::CommentCreate).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, queued.id);
        assert_eq!(
            f.store.read_key("pending_comment_create_corrupt").unwrap().as_deref(),
            Some("{truncated")
        );

        let report = f.queues.drain(MutationKind::CommentCreate).await;
        assert_eq!(report, DrainReport { applied: 1, ..Default::default() });
        assert_eq!(f.backend.comments()[0].body, "after crash");
    }

    #[tokio::test]
    async fn test_concurrent_drain_of_same_kind_is_skipped() {
        let f = fixture(MockBackend::new().with_latency(std::time::Duration::from_millis(100)));
        f.queues.enqueue(MutationKind::CommentCreate, comment("slow"), "u1").unwrap();

        let queues = f.queues.clone();
        let first = tokio::spawn(async move { queues.drain(MutationKind::CommentCreate).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let second = f.queues.drain(MutationKind::CommentCreate).await;
        assert!(second.skipped);
        assert_eq!(second.remaining, 1);

        let first = first.await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(f.backend.calls().create_comment, 1);
    }

    #[tokio::test]
    async fn test_entries_queued_during_drain_wait_for_next_pass() {
        let f = fixture(MockBackend::new().with_latency(std::time::Duration::from_millis(50)));
        f.queues.enqueue(MutationKind::CommentCreate, comment("before"), "u1").unwrap();

        let queues = f.queues.clone();
        let pass = tokio::spawn(async move { queues.drain(MutationKind::CommentCreate).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let late = f.queues.enqueue(MutationKind::CommentCreate, comment("during"), "u1").unwrap();

        let report = pass.await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(f.queues.list_pending(MutationKind::CommentCreate).unwrap(), vec![late]);
    }
}
