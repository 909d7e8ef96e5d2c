//! Connectivity-triggered synchronizer.
//!
//! Drains every pending queue, one kind after another, when connectivity
//! returns, shortly after startup, and on the scheduler's connectivity check.
//! Overlapping triggers are coalesced into the run already in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::events::{DomainEvent, EventBus};
use crate::queue::{DrainReport, MutationKind, PendingQueues};
use crate::utils::InFlightFlag;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub per_kind: Vec<(MutationKind, DrainReport)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.per_kind.iter().map(|(_, r)| r.applied).sum()
    }

    pub fn discarded(&self) -> usize {
        self.per_kind.iter().map(|(_, r)| r.discarded).sum()
    }

    pub fn remaining(&self) -> usize {
        self.per_kind.iter().map(|(_, r)| r.remaining).sum()
    }

    /// Some queue could not be read during the run.
    pub fn has_failures(&self) -> bool {
        self.per_kind.iter().any(|(_, r)| r.failed)
    }
}

/// What the UI needs for a non-blocking "will retry later" indicator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub in_progress: bool,
    pub last_report: Option<SyncReport>,
    /// Entries were left queued, or a queue was unreadable, in the last run
    pub retry_pending: bool,
}

pub struct Synchronizer {
    queues: Arc<PendingQueues>,
    connectivity: Arc<Connectivity>,
    events: EventBus,
    running: InFlightFlag,
    last_report: Mutex<Option<SyncReport>>,
}

impl Synchronizer {
    pub fn new(
        queues: Arc<PendingQueues>,
        connectivity: Arc<Connectivity>,
        events: EventBus,
    ) -> Self {
        Self {
            queues,
            connectivity,
            events,
            running: InFlightFlag::new(),
            last_report: Mutex::new(None),
        }
    }

    /// Drain every kind sequentially.
    ///
    /// Returns `None` without touching the backend when offline or when
    /// another run is in flight.
    pub async fn sync_all(&self) -> Option<SyncReport> {
        if !self.connectivity.is_online() {
            debug!("Offline, sync deferred");
            return None;
        }
        let Some(_running) = self.running.try_acquire() else {
            debug!("Sync already in flight, trigger coalesced");
            return None;
        };

        let started_at = Utc::now();
        let mut per_kind = Vec::with_capacity(MutationKind::ALL.len());
        for kind in MutationKind::ALL {
            let report = self.queues.drain(kind).await;
            per_kind.push((kind, report));
        }

        let report = SyncReport {
            per_kind,
            started_at,
            finished_at: Utc::now(),
        };

        if report.remaining() > 0 {
            warn!(
                applied = report.applied(),
                remaining = report.remaining(),
                "Sync left mutations queued, will retry later"
            );
        } else if report.applied() > 0 || report.discarded() > 0 {
            info!(applied = report.applied(), discarded = report.discarded(), "Sync complete");
        } else {
            debug!("Sync found nothing to do");
        }

        self.events.publish(DomainEvent::SyncFinished {
            applied: report.applied(),
            remaining: report.remaining(),
        });
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        Some(report)
    }

    /// Run `sync_all` in the background.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<Option<SyncReport>> {
        let sync = Arc::clone(self);
        tokio::spawn(async move { sync.sync_all().await })
    }

    /// Run `sync_all` once `delay` has elapsed, letting the UI settle first.
    pub fn schedule_startup_sync(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(?delay, "Running startup sync");
            sync.sync_all().await;
        })
    }

    pub fn status(&self) -> SyncStatus {
        let last_report = self.last_report.lock().ok().and_then(|r| r.clone());
        let retry_pending = last_report
            .as_ref()
            .map(|r| r.remaining() > 0 || r.has_failures())
            .unwrap_or(false);
        SyncStatus {
            in_progress: self.running.is_running(),
            last_report,
            retry_pending,
        }
    }
}
