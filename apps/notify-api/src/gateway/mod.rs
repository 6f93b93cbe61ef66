//! Real-time notification gateway: rooms, channel layers and the WebSocket relay.

pub mod events;
pub mod fanout;
pub mod publisher;
pub mod redis_layer;
pub mod rooms;
pub mod server;
pub mod session;
