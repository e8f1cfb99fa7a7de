use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype over the domain error so the HTTP mapping stays in the adapter layer.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PipelineError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            PipelineError::WebhookSignature(reason) => {
                tracing::warn!(reason = %reason, "webhook signature rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "invalid_signature",
                    "invalid webhook signature".to_string(),
                )
            }
            PipelineError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token".to_string(),
            ),
            PipelineError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
            }
            PipelineError::NoSlotAvailable(_) => {
                (StatusCode::CONFLICT, "no_slot_available", self.0.to_string())
            }
            PipelineError::AlreadyAssigned { .. } => {
                (StatusCode::CONFLICT, "already_assigned", self.0.to_string())
            }
            PipelineError::GameLimitReached { .. } => {
                (StatusCode::CONFLICT, "game_limit_reached", self.0.to_string())
            }
            PipelineError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            PipelineError::NotEntitled(_) => {
                (StatusCode::FORBIDDEN, "not_entitled", self.0.to_string())
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            PipelineError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
