//! WebSocket upgrade handlers and the per-connection relay loop.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::AppState;

use super::events::CloseReason;
use super::fanout::Inbox;
use super::rooms::RoomKind;
use super::session::{ConnectionHandler, Delivery, Transport, TransportError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/leads/{lead_id}", scoped_room(RoomKind::Leads))
        .route("/ws/client/{client_id}", scoped_room(RoomKind::Client))
        .route("/ws/contracts", global_room(RoomKind::Contracts))
        .route("/ws/contracts/client/{client_id}", scoped_room(RoomKind::ContractsClient))
        .route("/ws/payments", global_room(RoomKind::Payments))
        .route("/ws/payments/client/{client_id}", scoped_room(RoomKind::PaymentsClient))
        .route("/ws/payments/contract/{contract_id}", scoped_room(RoomKind::PaymentsContract))
        .route("/ws/comments", global_room(RoomKind::Comments))
}

/// Route whose path carries the entity id.
fn scoped_room(kind: RoomKind) -> MethodRouter<AppState> {
    get(
        move |ws: WebSocketUpgrade,
              user: AuthUser,
              State(state): State<AppState>,
              Path(params): Path<HashMap<String, String>>| async move {
            upgrade(kind, ws, user, state, params).await
        },
    )
}

/// Route for a room shared by every client.
fn global_room(kind: RoomKind) -> MethodRouter<AppState> {
    get(
        move |ws: WebSocketUpgrade, user: AuthUser, State(state): State<AppState>| async move {
            upgrade(kind, ws, user, state, HashMap::new()).await
        },
    )
}

/// Subscribe first, then accept. A refused open never switches protocols.
async fn upgrade(
    kind: RoomKind,
    ws: WebSocketUpgrade,
    user: AuthUser,
    state: AppState,
    params: HashMap<String, String>,
) -> Response {
    let mut handler = ConnectionHandler::new(state.channels.clone(), state.config.delivery_policy());

    let inbox = match handler.open(kind, &params).await {
        Ok(inbox) => inbox,
        Err(err) => {
            tracing::debug!(user_id = user.user_id, room = %kind, error = %err, "refusing websocket connection");
            return ApiError::from(err).into_response();
        }
    };

    let shutdown = state.shutdown.subscribe();
    let connection_id = handler.id().clone();
    ws.on_failed_upgrade(move |err| {
        // The handler is dropped with the upgrade closure, which releases the subscription.
        tracing::debug!(connection_id = %connection_id, error = %err, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| run_connection(socket, handler, inbox, user, shutdown))
}

/// Drive one accepted socket until either side goes away.
async fn run_connection(
    socket: WebSocket,
    mut handler: ConnectionHandler,
    mut inbox: Inbox,
    user: AuthUser,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    tracing::info!(
        connection_id = %handler.id(),
        group = ?handler.group().map(|g| g.as_str()),
        user_id = user.user_id,
        "websocket connection accepted"
    );

    let reason = relay(&mut handler, &mut inbox, &mut ws_rx, &mut ws_tx, &mut shutdown).await;

    tracing::info!(
        connection_id = %handler.id(),
        user_id = user.user_id,
        %reason,
        "websocket connection ended"
    );
}

/// Relay loop: forward inbox events to `outbound` until the client leaves,
/// deliveries keep failing, or shutdown is signalled. The subscription is
/// released before returning.
async fn relay<S, T>(
    handler: &mut ConnectionHandler,
    inbox: &mut Inbox,
    inbound: &mut S,
    outbound: &mut T,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    T: Transport + ?Sized,
{
    let reason = loop {
        // A fresh receiver treats the current value as seen.
        if *shutdown.borrow() {
            break CloseReason::Shutdown;
        }

        tokio::select! {
            // Inbound frames carry nothing for us; only watch for the close.
            msg = inbound.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %handler.id(), "ws read error");
                        break CloseReason::ClientClosed;
                    }
                }
            }

            event = inbox.recv() => {
                match event {
                    Some(event) => {
                        if handler.on_broadcast(&event, outbound).await == Delivery::FailureLimitReached {
                            break CloseReason::DeliveryFailures;
                        }
                    }
                    None => break CloseReason::InboxClosed,
                }
            }

            _ = shutdown.changed() => break CloseReason::Shutdown,
        }
    };

    // Leave the group before anything else so no event targets a dead socket.
    handler.close(reason).await;

    if reason != CloseReason::ClientClosed {
        if let Err(err) = outbound.send_close(reason).await {
            tracing::debug!(connection_id = %handler.id(), error = %err, "close frame not sent");
        }
    }

    reason
}

#[async_trait]
impl Transport for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: reason.code(),
            reason: Utf8Bytes::from_static(reason.description()),
        };
        self.send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}
