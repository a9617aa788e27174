//! Best-effort fan-out of cluster state-change notifications.
//!
//! Events are emitted after the corresponding store change has been
//! committed. Delivery is ordered per subscriber but not globally; slow
//! subscribers may miss events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{Peer, VolumeInfo};

/// A cluster state-change notification, carrying the affected entity's
/// post-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// A volume was created.
    VolumeCreated {
        /// The committed volume.
        volume: VolumeInfo,
    },
    /// A volume was started.
    VolumeStarted {
        /// The committed volume.
        volume: VolumeInfo,
    },
    /// A volume was stopped.
    VolumeStopped {
        /// The committed volume.
        volume: VolumeInfo,
    },
    /// A volume was deleted.
    VolumeDeleted {
        /// ID of the deleted volume.
        id: Uuid,
        /// Name of the deleted volume.
        name: String,
    },
    /// A volume was expanded.
    VolumeExpanded {
        /// The committed volume.
        volume: VolumeInfo,
    },
    /// A peer joined the cluster.
    PeerJoined {
        /// The new peer record.
        peer: Peer,
    },
    /// A peer left the cluster.
    PeerLeft {
        /// The removed peer record.
        peer: Peer,
    },
}

impl ClusterEvent {
    /// Returns the topic string for this event.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::VolumeCreated { .. } => "volume.created",
            Self::VolumeStarted { .. } => "volume.started",
            Self::VolumeStopped { .. } => "volume.stopped",
            Self::VolumeDeleted { .. } => "volume.deleted",
            Self::VolumeExpanded { .. } => "volume.expanded",
            Self::PeerJoined { .. } => "peer.joined",
            Self::PeerLeft { .. } => "peer.left",
        }
    }
}

/// Best-effort broadcast bus for [`ClusterEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    /// Creates a bus retaining up to `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Lack of subscribers is not an error.
    pub fn publish(&self, event: ClusterEvent) {
        tracing::debug!(topic = event.topic(), "publishing cluster event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(ClusterEvent::VolumeDeleted { id: Uuid::new_v4(), name: "v".to_string() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "volume.deleted");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.publish(ClusterEvent::VolumeDeleted { id: Uuid::new_v4(), name: "v".to_string() });
    }

    #[tokio::test]
    async fn test_per_subscriber_ordering() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(ClusterEvent::VolumeDeleted { id: Uuid::new_v4(), name: "a".to_string() });
        bus.publish(ClusterEvent::VolumeDeleted { id: Uuid::new_v4(), name: "b".to_string() });

        match rx.recv().await.unwrap() {
            ClusterEvent::VolumeDeleted { name, .. } => assert_eq!(name, "a"),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ClusterEvent::VolumeDeleted { name, .. } => assert_eq!(name, "b"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
