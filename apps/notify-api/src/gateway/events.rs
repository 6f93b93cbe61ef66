//! Broadcast events and connection close reasons.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::GatewayError;

/// A pre-serialized payload relayed verbatim to every subscriber of a group.
///
/// The relay never inspects the text; producers and browser clients agree on
/// its shape out of band. Clones share the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    payload: Arc<str>,
}

impl BroadcastEvent {
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize `body` as compact JSON.
    pub fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self, GatewayError> {
        Ok(Self::new(serde_json::to_string(body)?))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

// ---------------------------------------------------------------------------
// Close reasons
// ---------------------------------------------------------------------------

/// Why a relay connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the socket went away.
    ClientClosed,
    /// Too many consecutive deliveries to this socket failed.
    DeliveryFailures,
    /// The registry dropped this connection's inbox.
    InboxClosed,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code (4000-range for application-level).
    pub fn code(self) -> u16 {
        match self {
            CloseReason::ClientClosed => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::DeliveryFailures => 4008,
            CloseReason::InboxClosed => 4010,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "Client closed",
            CloseReason::Shutdown => "Server shutting down",
            CloseReason::DeliveryFailures => "Too many failed deliveries",
            CloseReason::InboxClosed => "Subscription closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_events_are_compact() {
        let event = BroadcastEvent::json(&serde_json::json!({ "text": "lead_updated" })).unwrap();
        assert_eq!(event.payload(), r#"{"text":"lead_updated"}"#);
    }

    #[test]
    fn clones_share_the_payload() {
        let event = BroadcastEvent::new("hello");
        let copy = event.clone();
        assert!(std::ptr::eq(event.payload(), copy.payload()));
    }

    #[test]
    fn application_close_codes_are_in_private_range() {
        for reason in [CloseReason::DeliveryFailures, CloseReason::InboxClosed] {
            assert!((4000..5000).contains(&reason.code()));
        }
    }
}
