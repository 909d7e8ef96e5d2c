//! Platform connectivity signal.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::events::{DomainEvent, EventBus};

/// Whether the device believes it can reach the backend.
pub struct Connectivity {
    online: AtomicBool,
    events: EventBus,
}

impl Connectivity {
    pub fn new(online: bool, events: EventBus) -> Self {
        Self {
            online: AtomicBool::new(online),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record the platform's connectivity state.
    ///
    /// Returns `true` only for an offline to online transition, which is the
    /// caller's cue to start a sync.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return false;
        }
        if online {
            info!("Connectivity restored");
        } else {
            warn!("Connectivity lost, writes will be queued");
        }
        self.events.publish(DomainEvent::ConnectivityChanged { online });
        online
    }
}
