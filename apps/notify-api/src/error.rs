use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::gateway::fanout::ChannelError;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "REGISTRY_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Failures of the notification relay itself.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A required route parameter is missing or is not a canonical id.
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    /// The channel registry could not be reached (or did not answer in time).
    #[error("channel registry unavailable: {0}")]
    RegistryUnavailable(String),
    /// Forwarding an event to one connection's socket failed.
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ChannelError> for GatewayError {
    fn from(err: ChannelError) -> Self {
        Self::RegistryUnavailable(err.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidRoute(message) => Self::bad_request(message),
            GatewayError::RegistryUnavailable(message) => {
                tracing::warn!(%message, "channel registry unavailable");
                Self::service_unavailable("Notification channels are temporarily unavailable")
            }
            err @ (GatewayError::Delivery(_) | GatewayError::Encode(_)) => {
                tracing::error!(error = %err, "gateway error");
                Self::internal("An internal error occurred")
            }
        }
    }
}
