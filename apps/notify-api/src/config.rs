use std::str::FromStr;
use std::time::Duration;

use crate::gateway::session::DeliveryPolicy;

/// Notify API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret the CRUD backend signs access tokens with (HS256).
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Redis connection string. Unset runs a single-process channel layer.
    pub redis_url: Option<String>,
    /// Prefix of every Redis pubsub channel this relay uses.
    pub redis_channel_prefix: String,
    /// Cookie carrying the access token on WebSocket upgrades.
    pub auth_cookie_name: String,
    /// Events buffered per connection.
    pub inbox_capacity: usize,
    pub open_timeout: Duration,
    pub delivery_timeout: Duration,
    pub publish_timeout: Duration,
    /// Consecutive failed deliveries before a connection is closed (0 = never).
    pub delivery_failure_limit: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing
    /// or a numeric one does not parse.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT", 8001),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            redis_channel_prefix: std::env::var("REDIS_CHANNEL_PREFIX")
                .unwrap_or_else(|_| "notify:".to_string()),
            auth_cookie_name: std::env::var("AUTH_COOKIE_NAME")
                .unwrap_or_else(|_| "access_token".to_string()),
            inbox_capacity: parsed_var("INBOX_CAPACITY", 256),
            open_timeout: Duration::from_millis(parsed_var("OPEN_TIMEOUT_MS", 5000)),
            delivery_timeout: Duration::from_millis(parsed_var("DELIVERY_TIMEOUT_MS", 5000)),
            publish_timeout: Duration::from_millis(parsed_var("PUBLISH_TIMEOUT_MS", 5000)),
            delivery_failure_limit: parsed_var("DELIVERY_FAILURE_LIMIT", 3),
        }
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            open_timeout: self.open_timeout,
            delivery_timeout: self.delivery_timeout,
            failure_limit: self.delivery_failure_limit,
            inbox_capacity: self.inbox_capacity,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} env var is not a valid value: {raw:?}")),
        _ => default,
    }
}
