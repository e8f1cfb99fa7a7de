use {
    super::id::{ServiceId, UserId},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no slot available for service {0}")]
    NoSlotAvailable(ServiceId),

    #[error("user {user_id} already holds the maximum number of slots for service {service_id}")]
    AlreadyAssigned {
        user_id: UserId,
        service_id: ServiceId,
    },

    #[error("game limit reached: plan allows {max_games} games")]
    GameLimitReached { max_games: u32 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("user {0} has no active entitlement")]
    NotEntitled(UserId),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
