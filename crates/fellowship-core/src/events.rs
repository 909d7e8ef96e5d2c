//! Typed domain events.
//!
//! Page components subscribe here instead of listening for loosely named
//! platform events. Delivery is best effort: a lagging subscriber loses the
//! oldest events, and publishing with no subscribers is a no-op.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::queue::MutationKind;

/// Events retained per subscriber before the oldest are dropped.
const EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    /// A user signed in (`Some`) or out (`None`)
    AuthStateChanged { identity: Option<String> },
    /// The cached profile for `identity` changed
    ProfileChanged { identity: String },
    /// The user set a new avatar, queued or confirmed
    AvatarChanged { identity: String },
    ConnectivityChanged { online: bool },
    MutationQueued { kind: MutationKind, id: String },
    MutationApplied { kind: MutationKind, id: String },
    /// Dropped unapplied because it outlived the maximum age
    MutationDiscarded { kind: MutationKind, id: String },
    SyncFinished { applied: usize, remaining: usize },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: DomainEvent) {
        trace!(?event, "Publishing domain event");
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ConnectivityChanged { online: true });
        bus.publish(DomainEvent::AuthStateChanged { identity: None });

        assert_eq!(rx.recv().await.unwrap(), DomainEvent::ConnectivityChanged { online: true });
        assert_eq!(rx.recv().await.unwrap(), DomainEvent::AuthStateChanged { identity: None });
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(DomainEvent::SyncFinished { applied: 0, remaining: 0 });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = DomainEvent::MutationQueued {
            kind: MutationKind::CommentCreate,
            id: "local-1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mutationQueued");
        assert_eq!(json["kind"], "commentCreate");
    }
}
