//! UI and operator routes. Guarded by a bearer token when one is configured.

use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            catalog::Target,
            error::PipelineError,
            id::{PlanId, ServiceId, SlotId, TransactionId, UserId},
            slot::SlotStatus,
        },
        infra::signature,
        services::invoices,
    },
    axum::{
        Json,
        body::Bytes,
        extract::{Path, Query, Request, State},
        http::header::AUTHORIZATION,
        middleware::Next,
        response::Response,
    },
    chrono::Utc,
    serde::Deserialize,
    serde_json::{Value, json},
    uuid::Uuid,
};

type JsonResult = Result<Json<Value>, ApiError>;

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.admin_token {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if !presented.is_some_and(|token| signature::tokens_match(expected, token)) {
            return Err(PipelineError::Unauthorized.into());
        }
    }
    Ok(next.run(request).await)
}

fn slot_id(raw: &str) -> Result<SlotId, PipelineError> {
    Uuid::parse_str(raw.trim())
        .map(SlotId::from_uuid)
        .map_err(|_| PipelineError::Validation(format!("invalid slot id: {raw}")))
}

fn to_json<T: serde::Serialize>(value: T) -> JsonResult {
    Ok(Json(serde_json::to_value(value).map_err(PipelineError::from)?))
}

// ── users ─────────────────────────────────────────────────────────────────

pub async fn get_subscription(State(state): State<AppState>, Path(user): Path<String>) -> JsonResult {
    let status = state.entitlements.status(UserId::parse(&user)?).await?;
    to_json(status)
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    pub months: u32,
}

pub async fn renew_subscription(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<RenewRequest>,
) -> JsonResult {
    let renewed = state
        .entitlements
        .renew(UserId::parse(&user)?, req.months)
        .await?;
    to_json(renewed)
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(user): Path<String>,
    body: Bytes,
) -> JsonResult {
    let req: CancelRequest = optional_body(&body)?;
    let reason = req.reason.as_deref().unwrap_or("user_requested");
    let cancelled = state
        .entitlements
        .cancel(UserId::parse(&user)?, reason)
        .await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

#[derive(Debug, Deserialize)]
pub struct FounderRequest {
    pub founder: bool,
}

pub async fn set_founder(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<FounderRequest>,
) -> JsonResult {
    let user = state
        .entitlements
        .set_founder(UserId::parse(&user)?, req.founder)
        .await?;
    to_json(user)
}

// ── games ─────────────────────────────────────────────────────────────────

pub async fn list_games(State(state): State<AppState>, Path(user): Path<String>) -> JsonResult {
    let games = state.entitlements.games(UserId::parse(&user)?).await?;
    to_json(games)
}

#[derive(Debug, Deserialize)]
pub struct SelectGameRequest {
    pub game_id: String,
}

pub async fn select_game(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<SelectGameRequest>,
) -> JsonResult {
    let selection = state
        .entitlements
        .select_game(UserId::parse(&user)?, &req.game_id)
        .await?;
    to_json(selection)
}

pub async fn remove_game(
    State(state): State<AppState>,
    Path((user, game_id)): Path<(String, String)>,
) -> JsonResult {
    let removed = state
        .entitlements
        .remove_game(UserId::parse(&user)?, &game_id)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

// ── slots ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SlotFilter {
    pub status: Option<String>,
}

pub async fn list_slots(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(filter): Query<SlotFilter>,
) -> JsonResult {
    let status = filter
        .status
        .as_deref()
        .map(SlotStatus::try_from)
        .transpose()?;
    let service_id = ServiceId::new(service)?;
    let slots = match status {
        Some(SlotStatus::Assigned) => state.allocator.list_assigned(&service_id).await?,
        other => state.allocator.list(&service_id, other).await?,
    };
    to_json(slots)
}

#[derive(Debug, Deserialize)]
pub struct AddSlotRequest {
    pub account_id: String,
    pub label: Option<String>,
}

pub async fn add_slot(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(req): Json<AddSlotRequest>,
) -> JsonResult {
    let slot = state
        .allocator
        .add_slot(&ServiceId::new(service)?, &req.account_id, req.label)
        .await?;
    to_json(slot)
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub user_id: String,
}

pub async fn release_for_user(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> JsonResult {
    let released = state
        .allocator
        .release_for_user(&ServiceId::new(service)?, UserId::parse(&req.user_id)?)
        .await?;
    Ok(Json(json!({ "released": released })))
}

pub async fn unassign_slot(State(state): State<AppState>, Path(slot): Path<String>) -> JsonResult {
    let released = state.allocator.unassign(slot_id(&slot)?).await?;
    Ok(Json(json!({ "released": released })))
}

// ── operations ────────────────────────────────────────────────────────────

pub async fn run_sweep(State(state): State<AppState>) -> JsonResult {
    let report = state.sweeper.sweep(Utc::now()).await?;
    to_json(report)
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub user_id: String,
    pub plan_id: String,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> JsonResult {
    let recorded = invoices::create_invoice(
        state.ledger.as_ref(),
        &state.catalog,
        UserId::parse(&req.user_id)?,
        &PlanId::new(req.plan_id)?,
    )
    .await?;
    Ok(Json(json!({
        "created": recorded.is_created(),
        "transaction": recorded.transaction(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
}

pub async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> JsonResult {
    let req: ReconcileRequest = optional_body(&body)?;
    let target = match (req.service_id, req.plan_id) {
        (Some(service), _) => Some(Target::Streaming(ServiceId::new(service)?)),
        (None, Some(plan)) => Some(Target::Game(PlanId::new(plan)?)),
        (None, None) => None,
    };
    let tx = state
        .processor
        .reconcile(&TransactionId::new(id)?, target)
        .await?;
    Ok(Json(json!({
        "status": tx.fulfillment.as_ref().map(|f| f.as_str()),
        "transaction": tx,
    })))
}

/// Empty body means defaults.
fn optional_body<T: Default + serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, PipelineError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| PipelineError::Validation(format!("malformed request body: {e}")))
}
