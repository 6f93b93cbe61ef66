#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use notify_api::config::Config;
use notify_api::gateway::fanout::{ChannelLayer, MemoryChannelLayer};
use notify_api::gateway::rooms::GroupKey;
use notify_api::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration with short timeouts and no Redis.
pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_SECRET.to_string(),
        port: 0,
        redis_url: None,
        redis_channel_prefix: "notify-test:".to_string(),
        auth_cookie_name: "access_token".to_string(),
        inbox_capacity: 64,
        open_timeout: Duration::from_secs(1),
        delivery_timeout: Duration::from_secs(1),
        publish_timeout: Duration::from_secs(1),
        delivery_failure_limit: 3,
    }
}

/// Build a test AppState backed by an in-memory channel layer.
pub fn test_state() -> (AppState, Arc<MemoryChannelLayer>) {
    let layer = Arc::new(MemoryChannelLayer::new());
    let state = AppState::new(layer.clone(), test_config());
    (state, layer)
}

/// Build a test AppState on top of any channel layer.
pub fn test_state_with(channels: Arc<dyn ChannelLayer>) -> AppState {
    AppState::new(channels, test_config())
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryChannelLayer>) {
    let (state, layer) = test_state();
    let app = notify_api::routes::router().with_state(state.clone());
    (app, state, layer)
}

/// Mint a valid access token for `user_id`.
pub fn access_token(user_id: u64) -> String {
    notify_api::auth::tokens::mint_access_token(TEST_SECRET, user_id, chrono::Duration::minutes(5))
        .expect("mint access token")
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = notify_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Open a WebSocket on `path`, sending `token` in the auth cookie if given.
pub async fn connect(
    addr: SocketAddr,
    path: &str,
    token: Option<&str>,
) -> Result<WsStream, tungstenite::Error> {
    let mut request = format!("ws://{addr}{path}").into_client_request()?;
    if let Some(token) = token {
        request.headers_mut().insert(
            COOKIE,
            HeaderValue::from_str(&format!("access_token={token}")).unwrap(),
        );
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

/// Connect and expect the upgrade to be refused with `status`.
pub async fn expect_refused(addr: SocketAddr, path: &str, token: Option<&str>, status: u16) {
    match connect(addr, path, token).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), status, "unexpected status for {path}");
        }
        Err(other) => panic!("expected HTTP {status} for {path}, got error: {other:?}"),
        Ok(_) => panic!("expected HTTP {status} for {path}, but the upgrade succeeded"),
    }
}

/// Read the next text frame, skipping pings.
pub async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => return text.as_str().to_owned(),
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

/// Assert nothing arrives on `ws` for a short while.
pub async fn assert_silent(ws: &mut WsStream) {
    let result = time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no message, got: {result:?}");
}

/// Poll until `group` has exactly `expected` local subscribers.
pub async fn wait_for_subscribers(layer: &MemoryChannelLayer, group: &GroupKey, expected: usize) {
    for _ in 0..100 {
        if layer.group_size(group) == expected {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(layer.group_size(group), expected, "subscribers of {group}");
}
