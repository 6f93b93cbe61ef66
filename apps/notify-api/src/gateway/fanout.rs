//! Channel registry: group subscriptions and fan-out of broadcast events.
//!
//! Every connection registers a bounded inbox under exactly one group key.
//! Publishing never awaits a subscriber: each inbox gets a non-blocking send,
//! so a slow or dead socket only ever loses its own events.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::BroadcastEvent;
use super::rooms::GroupKey;
use super::session::ConnectionId;

/// Receiving end of a connection's subscription.
pub type Inbox = mpsc::Receiver<BroadcastEvent>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("{0}")]
    Unavailable(String),
    #[error("registry operation timed out")]
    Timeout,
}

/// Handle the registry uses to reach one connection.
#[derive(Debug, Clone)]
pub struct ConnectionRef {
    pub id: ConnectionId,
    sender: mpsc::Sender<BroadcastEvent>,
}

impl ConnectionRef {
    /// Create a handle plus the inbox its events arrive on.
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, Inbox) {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        (Self { id, sender }, inbox)
    }
}

/// Pub/sub fabric shared by every connection and publisher in the process.
///
/// Implementations must be safe to call concurrently from many connections.
#[async_trait]
pub trait ChannelLayer: Send + Sync {
    /// Register `conn` under `group`. Re-subscribing the same id replaces it.
    async fn subscribe(&self, group: &GroupKey, conn: ConnectionRef) -> Result<(), ChannelError>;

    /// Remove a connection from a group. Unknown ids are ignored.
    async fn unsubscribe(&self, group: &GroupKey, id: &ConnectionId) -> Result<(), ChannelError>;

    /// Deliver `event` to everyone subscribed to `group` right now.
    async fn publish(&self, group: &GroupKey, event: BroadcastEvent) -> Result<(), ChannelError>;

    /// Number of connections in this process subscribed to `group`.
    fn local_subscribers(&self, group: &GroupKey) -> usize;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Single-process channel layer.
///
/// Uses `DashMap` for shard-level concurrency; groups with no subscribers
/// are removed so the map only ever holds live groups.
#[derive(Default)]
pub struct MemoryChannelLayer {
    groups: DashMap<GroupKey, HashMap<ConnectionId, mpsc::Sender<BroadcastEvent>>>,
}

impl MemoryChannelLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups with at least one subscriber.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_size(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map(|subs| subs.len()).unwrap_or(0)
    }

    pub(crate) fn add(&self, group: &GroupKey, conn: ConnectionRef) {
        self.groups
            .entry(group.clone())
            .or_default()
            .insert(conn.id, conn.sender);
    }

    pub(crate) fn remove(&self, group: &GroupKey, id: &ConnectionId) -> bool {
        let removed = match self.groups.get_mut(group) {
            Some(mut subs) => subs.remove(id).is_some(),
            None => false,
        };
        self.groups.remove_if(group, |_, subs| subs.is_empty());
        removed
    }

    /// Fan `event` out to the group's inboxes. Returns how many accepted it.
    pub(crate) fn deliver(&self, group: &GroupKey, event: &BroadcastEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        if let Some(subs) = self.groups.get(group) {
            for (id, sender) in subs.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            group = %group,
                            connection_id = %id,
                            "subscriber inbox full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        // Inboxes whose connection task is gone without unsubscribing.
        for id in closed {
            if self.remove(group, &id) {
                tracing::debug!(group = %group, connection_id = %id, "pruned closed subscriber");
            }
        }

        delivered
    }
}

#[async_trait]
impl ChannelLayer for MemoryChannelLayer {
    async fn subscribe(&self, group: &GroupKey, conn: ConnectionRef) -> Result<(), ChannelError> {
        self.add(group, conn);
        Ok(())
    }

    async fn unsubscribe(&self, group: &GroupKey, id: &ConnectionId) -> Result<(), ChannelError> {
        self.remove(group, id);
        Ok(())
    }

    async fn publish(&self, group: &GroupKey, event: BroadcastEvent) -> Result<(), ChannelError> {
        let delivered = self.deliver(group, &event);
        tracing::debug!(group = %group, delivered, "event fanned out");
        Ok(())
    }

    fn local_subscribers(&self, group: &GroupKey) -> usize {
        self.group_size(group)
    }
}
