//! Broadcast-on-mutation: CRUD flows hand their event to the publisher after
//! a create, update or delete.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time;

use crate::error::GatewayError;

use super::events::BroadcastEvent;
use super::fanout::{ChannelError, ChannelLayer};
use super::rooms::{GroupKey, Room};

/// Publishes events to the group of a [`Room`]. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    channels: Arc<dyn ChannelLayer>,
    timeout: Duration,
}

impl EventPublisher {
    pub fn new(channels: Arc<dyn ChannelLayer>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    /// Publish a pre-serialized event. Returns the group it went to.
    ///
    /// A publish that does not finish within the timeout is dropped and
    /// reported as `RegistryUnavailable`.
    pub async fn publish(&self, room: &Room, event: BroadcastEvent) -> Result<GroupKey, GatewayError> {
        let group = room.group_key();

        match time::timeout(self.timeout, self.channels.publish(&group, event)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    group = %group,
                    local_subscribers = self.channels.local_subscribers(&group),
                    "event published"
                );
                Ok(group)
            }
            Ok(Err(err)) => {
                tracing::warn!(group = %group, error = %err, "publish failed");
                Err(err.into())
            }
            Err(_elapsed) => {
                tracing::warn!(group = %group, "publish timed out, event dropped");
                Err(ChannelError::Timeout.into())
            }
        }
    }

    /// Serialize `body` as JSON and publish it.
    pub async fn publish_json<T>(&self, room: &Room, body: &T) -> Result<GroupKey, GatewayError>
    where
        T: Serialize + ?Sized,
    {
        let event = BroadcastEvent::json(body)?;
        self.publish(room, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::gateway::fanout::{ConnectionRef, MemoryChannelLayer};
    use crate::gateway::session::ConnectionId;

    /// Accepts publishes but never completes them.
    struct StalledLayer;

    #[async_trait]
    impl ChannelLayer for StalledLayer {
        async fn subscribe(&self, _: &GroupKey, _: ConnectionRef) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn unsubscribe(&self, _: &GroupKey, _: &ConnectionId) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn publish(&self, _: &GroupKey, _: BroadcastEvent) -> Result<(), ChannelError> {
            std::future::pending().await
        }

        fn local_subscribers(&self, _: &GroupKey) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn publishes_to_the_room_group() {
        let layer = Arc::new(MemoryChannelLayer::new());
        let publisher = EventPublisher::new(layer.clone(), Duration::from_secs(1));

        let room = Room::ContractsClient { client_id: 7 };
        let (conn, mut inbox) = ConnectionRef::new(ConnectionId::new(), 4);
        layer.subscribe(&room.group_key(), conn).await.unwrap();

        let group = publisher
            .publish_json(&room, &serde_json::json!({ "text": "contract_created" }))
            .await
            .unwrap();

        assert_eq!(group.as_str(), "contracts-client-7");
        assert_eq!(inbox.recv().await.unwrap().payload(), r#"{"text":"contract_created"}"#);
    }

    #[tokio::test]
    async fn global_and_scoped_rooms_do_not_mix() {
        let layer = Arc::new(MemoryChannelLayer::new());
        let publisher = EventPublisher::new(layer.clone(), Duration::from_secs(1));

        let (global, mut global_inbox) = ConnectionRef::new(ConnectionId::new(), 4);
        let (scoped, mut scoped_inbox) = ConnectionRef::new(ConnectionId::new(), 4);
        layer.subscribe(&Room::Contracts.group_key(), global).await.unwrap();
        layer
            .subscribe(&Room::ContractsClient { client_id: 1 }.group_key(), scoped)
            .await
            .unwrap();

        publisher
            .publish(&Room::Contracts, BroadcastEvent::new("all contracts"))
            .await
            .unwrap();

        assert_eq!(global_inbox.recv().await.unwrap().payload(), "all contracts");
        assert!(scoped_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_publish_reports_registry_unavailable() {
        let publisher = EventPublisher::new(Arc::new(StalledLayer), Duration::from_millis(20));

        match publisher.publish(&Room::Comments, BroadcastEvent::new("late")).await {
            Err(GatewayError::RegistryUnavailable(message)) => {
                assert_eq!(message, ChannelError::Timeout.to_string());
            }
            other => panic!("expected RegistryUnavailable, got {other:?}"),
        }
    }
}
