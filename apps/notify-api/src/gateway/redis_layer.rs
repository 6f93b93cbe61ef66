//! Redis-backed channel layer for running several relay processes side by side.
//!
//! Publishing goes through `PUBLISH <prefix><group>`. Each process keeps one
//! `PSUBSCRIBE <prefix>*` listener that feeds incoming messages into a local
//! [`MemoryChannelLayer`], which does the per-connection fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::events::BroadcastEvent;
use super::fanout::{ChannelError, ChannelLayer, ConnectionRef, MemoryChannelLayer};
use super::rooms::{GroupKey, Room};
use super::session::ConnectionId;

pub struct RedisChannelLayer {
    manager: ConnectionManager,
    local: Arc<MemoryChannelLayer>,
    prefix: String,
    /// Cleared when the pubsub listener stops; new subscriptions are refused.
    listening: Arc<AtomicBool>,
}

impl RedisChannelLayer {
    /// Connect to Redis and start the pubsub listener.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, ChannelError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{prefix}*")).await?;

        let local = Arc::new(MemoryChannelLayer::new());
        let listening = Arc::new(AtomicBool::new(true));
        tokio::spawn(listen(
            pubsub,
            local.clone(),
            prefix.to_string(),
            listening.clone(),
        ));

        tracing::info!(%prefix, "redis channel layer connected");

        Ok(Self {
            manager,
            local,
            prefix: prefix.to_string(),
            listening,
        })
    }

    fn channel_name(&self, group: &GroupKey) -> String {
        format!("{}{}", self.prefix, group)
    }
}

#[async_trait]
impl ChannelLayer for RedisChannelLayer {
    async fn subscribe(&self, group: &GroupKey, conn: ConnectionRef) -> Result<(), ChannelError> {
        if !self.listening.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable(
                "redis pubsub listener is not running".to_string(),
            ));
        }

        // A subscription is only useful if publishes can reach us.
        let mut manager = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut manager).await?;

        self.local.add(group, conn);
        Ok(())
    }

    async fn unsubscribe(&self, group: &GroupKey, id: &ConnectionId) -> Result<(), ChannelError> {
        self.local.remove(group, id);
        Ok(())
    }

    async fn publish(&self, group: &GroupKey, event: BroadcastEvent) -> Result<(), ChannelError> {
        let mut manager = self.manager.clone();
        let receivers: i64 = manager
            .publish(self.channel_name(group), event.payload())
            .await?;
        tracing::debug!(group = %group, receivers, "event published to redis");
        Ok(())
    }

    fn local_subscribers(&self, group: &GroupKey) -> usize {
        self.local.group_size(group)
    }
}

/// Map a Redis channel name back to the group it carries, if it is ours.
fn group_for_channel(prefix: &str, channel: &str) -> Option<GroupKey> {
    let key = channel.strip_prefix(prefix)?;
    Room::from_group_key(key).ok().map(|room| room.group_key())
}

async fn listen(
    pubsub: redis::aio::PubSub,
    local: Arc<MemoryChannelLayer>,
    prefix: String,
    listening: Arc<AtomicBool>,
) {
    let mut messages = pubsub.into_on_message();

    while let Some(msg) = messages.next().await {
        let Some(group) = group_for_channel(&prefix, msg.get_channel_name()) else {
            tracing::debug!(channel = msg.get_channel_name(), "ignoring message on unknown channel");
            continue;
        };

        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(group = %group, error = %err, "undecodable pubsub payload");
                continue;
            }
        };

        local.deliver(&group, &BroadcastEvent::new(payload));
    }

    listening.store(false, Ordering::Release);
    tracing::error!("redis pubsub stream ended; cross-process events will no longer arrive");
}
