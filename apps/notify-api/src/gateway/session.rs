//! Per-connection state: the group subscription and delivery bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agency_common::id::prefix;
use agency_common::PrefixedId;
use async_trait::async_trait;
use tokio::time;

use crate::error::GatewayError;

use super::events::{BroadcastEvent, CloseReason};
use super::fanout::{ChannelError, ChannelLayer, ConnectionRef, Inbox};
use super::rooms::{GroupKey, Room, RoomKind};

/// Unique id of one relay connection (`conn_` prefixed ULID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl PrefixedId for ConnectionId {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(<Self as PrefixedId>::generate())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The write half of a client connection.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    async fn send_close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

/// Timeouts and limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Upper bound on subscribing to the registry during open.
    pub open_timeout: Duration,
    /// Upper bound on one socket write.
    pub delivery_timeout: Duration,
    /// Consecutive failed deliveries before the relay closes the connection.
    /// Zero never closes.
    pub failure_limit: u32,
    /// Events buffered per connection before new ones are dropped.
    pub inbox_capacity: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(5),
            failure_limit: 3,
            inbox_capacity: 256,
        }
    }
}

/// Result of relaying one event to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The write failed; the event is lost for this connection only.
    Dropped,
    /// The write failed and the consecutive-failure limit was reached.
    FailureLimitReached,
}

/// Owns one connection's membership in the channel registry.
///
/// A handler holds at most one group key. `close` releases it; if the handler
/// is dropped while still subscribed, the release is spawned onto the runtime.
pub struct ConnectionHandler {
    id: ConnectionId,
    channels: Arc<dyn ChannelLayer>,
    policy: DeliveryPolicy,
    group: Option<GroupKey>,
    consecutive_failures: u32,
}

impl ConnectionHandler {
    pub fn new(channels: Arc<dyn ChannelLayer>, policy: DeliveryPolicy) -> Self {
        Self {
            id: ConnectionId::new(),
            channels,
            policy,
            group: None,
            consecutive_failures: 0,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn group(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    /// Resolve the room for `kind` and subscribe to its group.
    ///
    /// On error nothing is registered and the caller must refuse the
    /// connection.
    pub async fn open(
        &mut self,
        kind: RoomKind,
        params: &HashMap<String, String>,
    ) -> Result<Inbox, GatewayError> {
        if let Some(group) = &self.group {
            return Err(GatewayError::InvalidRoute(format!(
                "connection is already subscribed to {group}"
            )));
        }

        let group = Room::resolve(kind, params)?.group_key();
        let (conn, inbox) = ConnectionRef::new(self.id.clone(), self.policy.inbox_capacity);

        match time::timeout(self.policy.open_timeout, self.channels.subscribe(&group, conn)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(connection_id = %self.id, group = %group, error = %err, "subscribe failed");
                return Err(err.into());
            }
            Err(_elapsed) => {
                tracing::warn!(connection_id = %self.id, group = %group, "subscribe timed out");
                return Err(ChannelError::Timeout.into());
            }
        }

        tracing::info!(connection_id = %self.id, group = %group, "connection subscribed");
        self.group = Some(group);
        Ok(inbox)
    }

    /// Leave the group, if any. Safe to call any number of times.
    pub async fn close(&mut self, reason: CloseReason) {
        let Some(group) = self.group.take() else {
            return;
        };

        if let Err(err) = self.channels.unsubscribe(&group, &self.id).await {
            tracing::warn!(connection_id = %self.id, group = %group, error = %err, "unsubscribe failed");
        }

        tracing::info!(
            connection_id = %self.id,
            group = %group,
            code = reason.code(),
            "connection unsubscribed"
        );
    }

    /// Forward one event verbatim. Failures are logged and swallowed.
    pub async fn on_broadcast<T>(&mut self, event: &BroadcastEvent, transport: &mut T) -> Delivery
    where
        T: Transport + ?Sized,
    {
        let result = match time::timeout(
            self.policy.delivery_timeout,
            transport.send_text(event.payload()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(GatewayError::Delivery(err.to_string())),
            Err(_elapsed) => Err(GatewayError::Delivery("socket write timed out".to_string())),
        };

        let Err(err) = result else {
            self.consecutive_failures = 0;
            return Delivery::Sent;
        };

        self.consecutive_failures += 1;
        tracing::warn!(
            connection_id = %self.id,
            group = self.group.as_ref().map(GroupKey::as_str).unwrap_or("-"),
            failures = self.consecutive_failures,
            error = %err,
            "dropping event for connection"
        );

        let limit = self.policy.failure_limit;
        if limit > 0 && self.consecutive_failures >= limit {
            Delivery::FailureLimitReached
        } else {
            Delivery::Dropped
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };

        let channels = self.channels.clone();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = channels.unsubscribe(&group, &id).await {
                        tracing::warn!(connection_id = %id, group = %group, error = %err, "deferred unsubscribe failed");
                    } else {
                        tracing::debug!(connection_id = %id, group = %group, "released subscription on drop");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(connection_id = %id, group = %group, "no runtime to release subscription");
            }
        }
    }
}
