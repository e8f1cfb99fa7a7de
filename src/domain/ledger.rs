use {
    super::error::PipelineError,
    super::game::{GameSelection, SelectionResult},
    super::id::{ServiceId, SlotId, TransactionId, UserId},
    super::slot::{ClaimResult, NewSlot, ProfileSlot, SlotClaim, SlotStatus},
    super::subscription::{NewSubscription, Replaced, Subscription},
    super::transaction::{Fulfillment, NewTransaction, Recorded, Transaction, TransactionStatus},
    super::user::{NewUser, Provisioned, User},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

/// Durable store of every record the pipeline owns.
///
/// Each method is one atomic step on the backing store: a conditional
/// insert or update whose predicate is evaluated by the store, never a
/// read followed by a client-side write.
#[async_trait]
pub trait Ledger: Send + Sync {
    // ── transactions ──────────────────────────────────────────────────────

    /// Insert-if-absent keyed by transaction id.
    async fn record_transaction(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError>;

    async fn get_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, PipelineError>;

    /// Compare-and-set on status. `None` when the record no longer has `from`.
    async fn advance_transaction(
        &self,
        id: &TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        event: &str,
        raw_payload: &serde_json::Value,
    ) -> Result<Option<Transaction>, PipelineError>;

    /// Fill in the user resolved while fulfilling.
    async fn attach_user(&self, id: &TransactionId, user_id: UserId) -> Result<(), PipelineError>;

    async fn set_fulfillment(
        &self,
        id: &TransactionId,
        fulfillment: &Fulfillment,
    ) -> Result<(), PipelineError>;

    /// Move a paid, reconcilable transaction to `Reconciling`. A record with
    /// no outcome yet qualifies only if untouched since `settled_before`.
    /// `None` when another run holds it or there is nothing to reconcile.
    async fn begin_reconciliation(
        &self,
        id: &TransactionId,
        settled_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, PipelineError>;

    /// Insert a pending invoice unless the user already has one for the plan.
    async fn create_invoice(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError>;

    // ── users ─────────────────────────────────────────────────────────────

    async fn get_user(&self, id: UserId) -> Result<Option<User>, PipelineError>;

    /// Resolve by email, inserting the placeholder when the email is unseen.
    async fn provision_user(&self, user: &NewUser) -> Result<Provisioned, PipelineError>;

    async fn set_founder(&self, id: UserId, founder: bool) -> Result<Option<User>, PipelineError>;

    // ── subscriptions ─────────────────────────────────────────────────────

    /// Cancel every active subscription of the user, then insert `new` as active.
    async fn replace_active_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<Replaced, PipelineError>;

    async fn active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError>;

    async fn subscription_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Subscription>, PipelineError>;

    /// Set a new expiry on an active subscription if its expiry is still
    /// `expected`. Clears the expiry-notice flag.
    async fn extend_subscription(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError>;

    /// The user's most recently lapsed subscription.
    async fn latest_expired_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError>;

    /// Expired → active with a new expiry, if the row still carries
    /// `expired.expires_at` and the user holds no other active subscription.
    async fn reactivate_subscription(
        &self,
        expired: &Subscription,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError>;

    /// Active → cancelled. `None` if it was not active.
    async fn cancel_subscription(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError>;

    /// Active subscriptions past `now` → expired.
    async fn expire_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError>;

    /// Set the expiry-notice flag on active subscriptions expiring before
    /// `before` that have not been flagged yet, returning them.
    async fn flag_expiring_subscriptions(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError>;

    // ── profile slots ─────────────────────────────────────────────────────

    async fn insert_slot(&self, slot: &NewSlot) -> Result<ProfileSlot, PipelineError>;

    /// Assign one available slot of the service, respecting the claim's cap.
    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimResult, PipelineError>;

    /// Assigned → available. `None` if the slot was already available.
    async fn release_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError>;

    async fn release_slots_for_user(
        &self,
        service_id: &ServiceId,
        user_id: UserId,
    ) -> Result<Vec<ProfileSlot>, PipelineError>;

    /// Release every slot assigned strictly before `cutoff`.
    async fn release_slots_assigned_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ProfileSlot>, PipelineError>;

    async fn get_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError>;

    async fn list_slots(
        &self,
        service_id: &ServiceId,
        status: Option<SlotStatus>,
    ) -> Result<Vec<ProfileSlot>, PipelineError>;

    // ── game selections ───────────────────────────────────────────────────

    async fn add_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
        max_games: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<SelectionResult, PipelineError>;

    async fn list_game_selections(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameSelection>, PipelineError>;

    async fn remove_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
    ) -> Result<bool, PipelineError>;
}

