use {
    crate::{AppState, adapters::api_errors::ApiError},
    axum::{Json, body::Bytes, extract::State, http::HeaderMap},
    serde_json::json,
};

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Replays and post-dedupe failures both answer 200: the gateway must not
/// redeliver an id that has already been consumed.
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(
        transaction_id = tracing::field::Empty,
        event = tracing::field::Empty,
        outcome = tracing::field::Empty
    )
)]
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let result = state.processor.process(&body, signature).await?;
    let tx = result.transaction();

    tracing::Span::current()
        .record("transaction_id", tracing::field::display(&tx.id))
        .record("event", tx.event.as_str())
        .record("outcome", result.label());

    Ok(Json(json!({
        "status": result.label(),
        "transaction_id": tx.id,
        "transaction_status": tx.status,
        "fulfillment": tx.fulfillment,
    })))
}
