//! Publish endpoints called by CRUD services after a create, update or delete.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::value::RawValue;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, GatewayError};
use crate::gateway::events::BroadcastEvent;
use crate::gateway::rooms::{Room, RoomKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups/{kind}", post(publish_global))
        .route("/groups/{kind}/{entity_id}", post(publish_scoped))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    /// Group key the event was published to.
    pub group: String,
}

// ---------------------------------------------------------------------------
// POST /api/v1/groups/{kind}
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/groups/{kind}",
    tag = "Groups",
    params(("kind" = String, Path, description = "Global room kind: contracts, payments or comments")),
    request_body(content = Object, description = "Any JSON value, relayed byte for byte"),
    responses(
        (status = 202, description = "Event published", body = PublishResponse),
        (status = 400, description = "Unknown or scoped room kind", body = crate::error::ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 503, description = "Channel registry unavailable", body = crate::error::ApiErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn publish_global(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<Box<RawValue>>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    publish(&state, user_id, &kind, None, &body).await
}

// ---------------------------------------------------------------------------
// POST /api/v1/groups/{kind}/{entity_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/groups/{kind}/{entity_id}",
    tag = "Groups",
    params(
        ("kind" = String, Path, description = "Scoped room kind, e.g. leads or contracts-client"),
        ("entity_id" = String, Path, description = "Decimal id of the entity the room is scoped to"),
    ),
    request_body(content = Object, description = "Any JSON value, relayed byte for byte"),
    responses(
        (status = 202, description = "Event published", body = PublishResponse),
        (status = 400, description = "Unknown kind, global kind, or malformed id", body = crate::error::ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 503, description = "Channel registry unavailable", body = crate::error::ApiErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn publish_scoped(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path((kind, entity_id)): Path<(String, String)>,
    Json(body): Json<Box<RawValue>>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    publish(&state, user_id, &kind, Some(&entity_id), &body).await
}

async fn publish(
    state: &AppState,
    user_id: u64,
    kind: &str,
    entity_id: Option<&str>,
    body: &RawValue,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let kind: RoomKind = kind.parse()?;

    // Same resolution as the WebSocket routes: the URL shape picks the room.
    let mut params = HashMap::new();
    match (kind.id_param(), entity_id) {
        (Some(param), Some(id)) => {
            params.insert(param.to_string(), id.to_string());
        }
        (None, Some(_)) => {
            return Err(GatewayError::InvalidRoute(format!(
                "`{kind}` is a global room and takes no id"
            ))
            .into());
        }
        (_, None) => {}
    }
    let room = Room::resolve(kind, &params)?;

    // Relay the body exactly as sent; it is only checked to be well-formed JSON.
    let group = state
        .publisher
        .publish(&room, BroadcastEvent::new(body.get()))
        .await?;
    tracing::info!(user_id, group = %group, "event published");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            group: group.to_string(),
        }),
    ))
}
