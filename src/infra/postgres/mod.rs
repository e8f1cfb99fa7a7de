pub mod game_repo;
pub mod slot_repo;
pub mod subscription_repo;
pub mod transaction_repo;
pub mod user_repo;

use {
    crate::domain::{
        error::PipelineError,
        game::{GameSelection, SelectionResult},
        id::{ServiceId, SlotId, TransactionId, UserId},
        ledger::Ledger,
        slot::{ClaimResult, NewSlot, ProfileSlot, SlotClaim, SlotStatus},
        subscription::{NewSubscription, Replaced, Subscription},
        transaction::{Fulfillment, NewTransaction, Recorded, Transaction, TransactionStatus},
        user::{NewUser, Provisioned, User},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

/// Take a transaction-scoped advisory lock on `key`. Works even when the rows
/// it guards do not exist yet.
pub(crate) async fn advisory_lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    key: &str,
) -> Result<(), PipelineError> {
    sqlx::query("SET LOCAL lock_timeout = '5s'")
        .execute(&mut **tx)
        .await?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn record_transaction(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
        transaction_repo::record(&self.pool, tx).await
    }

    async fn get_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, PipelineError> {
        transaction_repo::find(&self.pool, id).await
    }

    async fn advance_transaction(
        &self,
        id: &TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        event: &str,
        raw_payload: &serde_json::Value,
    ) -> Result<Option<Transaction>, PipelineError> {
        transaction_repo::advance(&self.pool, id, from, to, event, raw_payload).await
    }

    async fn attach_user(&self, id: &TransactionId, user_id: UserId) -> Result<(), PipelineError> {
        transaction_repo::attach_user(&self.pool, id, user_id).await
    }

    async fn set_fulfillment(
        &self,
        id: &TransactionId,
        fulfillment: &Fulfillment,
    ) -> Result<(), PipelineError> {
        transaction_repo::set_fulfillment(&self.pool, id, fulfillment).await
    }

    async fn begin_reconciliation(
        &self,
        id: &TransactionId,
        settled_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, PipelineError> {
        transaction_repo::begin_reconciliation(&self.pool, id, settled_before).await
    }

    async fn create_invoice(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
        transaction_repo::create_invoice(&self.pool, tx).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, PipelineError> {
        user_repo::find(&self.pool, id).await
    }

    async fn provision_user(&self, user: &NewUser) -> Result<Provisioned, PipelineError> {
        user_repo::provision(&self.pool, user).await
    }

    async fn set_founder(&self, id: UserId, founder: bool) -> Result<Option<User>, PipelineError> {
        user_repo::set_founder(&self.pool, id, founder).await
    }

    async fn replace_active_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<Replaced, PipelineError> {
        subscription_repo::replace_active(&self.pool, new).await
    }

    async fn active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::active(&self.pool, user_id).await
    }

    async fn subscription_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::for_transaction(&self.pool, transaction_id).await
    }

    async fn extend_subscription(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::extend(&self.pool, id, expected, expires_at).await
    }

    async fn latest_expired_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::latest_expired(&self.pool, user_id).await
    }

    async fn reactivate_subscription(
        &self,
        expired: &Subscription,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::reactivate(&self.pool, expired, expires_at).await
    }

    async fn cancel_subscription(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::cancel(&self.pool, id, reason).await
    }

    async fn expire_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError> {
        subscription_repo::expire_lapsed(&self.pool, now).await
    }

    async fn flag_expiring_subscriptions(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError> {
        subscription_repo::flag_expiring(&self.pool, now, before).await
    }

    async fn insert_slot(&self, slot: &NewSlot) -> Result<ProfileSlot, PipelineError> {
        slot_repo::insert(&self.pool, slot).await
    }

    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimResult, PipelineError> {
        slot_repo::claim(&self.pool, claim).await
    }

    async fn release_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        slot_repo::release(&self.pool, id).await
    }

    async fn release_slots_for_user(
        &self,
        service_id: &ServiceId,
        user_id: UserId,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        slot_repo::release_for_user(&self.pool, service_id, user_id).await
    }

    async fn release_slots_assigned_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        slot_repo::release_assigned_before(&self.pool, cutoff).await
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        slot_repo::find(&self.pool, id).await
    }

    async fn list_slots(
        &self,
        service_id: &ServiceId,
        status: Option<SlotStatus>,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        slot_repo::list(&self.pool, service_id, status).await
    }

    async fn add_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
        max_games: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<SelectionResult, PipelineError> {
        game_repo::add(&self.pool, user_id, game_id, max_games, at).await
    }

    async fn list_game_selections(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameSelection>, PipelineError> {
        game_repo::list(&self.pool, user_id).await
    }

    async fn remove_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
    ) -> Result<bool, PipelineError> {
        game_repo::remove(&self.pool, user_id, game_id).await
    }
}
