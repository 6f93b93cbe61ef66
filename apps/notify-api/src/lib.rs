pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use config::Config;
use gateway::fanout::ChannelLayer;
use gateway::publisher::EventPublisher;
use tokio::sync::watch;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<dyn ChannelLayer>,
    pub publisher: EventPublisher,
    pub config: Arc<Config>,
    /// Flipped to `true` on shutdown; open connections close when it changes.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(channels: Arc<dyn ChannelLayer>, config: Config) -> Self {
        let publisher = EventPublisher::new(channels.clone(), config.publish_timeout);
        let (shutdown, _) = watch::channel(false);
        Self {
            channels,
            publisher,
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
        }
    }
}
