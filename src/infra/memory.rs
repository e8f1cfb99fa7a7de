//! In-process ledger. Every operation runs under one mutex, which gives the
//! same per-record atomicity the PostgreSQL ledger gets from conditional
//! statements. Only correct within a single process; use it for tests and
//! local runs without a database.

use {
    crate::domain::{
        error::PipelineError,
        game::{GameSelection, SelectionResult},
        id::{ServiceId, SlotId, TransactionId, UserId},
        ledger::Ledger,
        slot::{ClaimResult, NewSlot, ProfileSlot, SlotClaim, SlotStatus},
        subscription::{NewSubscription, Replaced, Subscription, SubscriptionStatus},
        transaction::{
            Fulfillment, NewTransaction, Recorded, Transaction, TransactionKind,
            TransactionStatus,
        },
        user::{NewUser, Provisioned, User, normalize_email},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::collections::HashMap,
    tokio::sync::Mutex,
    uuid::Uuid,
};

#[derive(Default)]
struct State {
    transactions: HashMap<TransactionId, Transaction>,
    users: HashMap<UserId, User>,
    subscriptions: Vec<Subscription>,
    slots: Vec<ProfileSlot>,
    games: Vec<GameSelection>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn release_where(
    slots: &mut [ProfileSlot],
    matches: impl Fn(&ProfileSlot) -> bool,
) -> Vec<ProfileSlot> {
    let mut released = Vec::new();
    for slot in slots.iter_mut() {
        if slot.status == SlotStatus::Assigned && matches(slot) {
            released.push(slot.clone());
            slot.clear();
        }
    }
    released
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_transaction(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.transactions.get(&tx.id) {
            return Ok(Recorded::Existing(existing.clone()));
        }
        let created = tx.clone().into_transaction(Utc::now());
        state.transactions.insert(tx.id.clone(), created.clone());
        Ok(Recorded::Created(created))
    }

    async fn get_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, PipelineError> {
        Ok(self.state.lock().await.transactions.get(id).cloned())
    }

    async fn advance_transaction(
        &self,
        id: &TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        event: &str,
        raw_payload: &serde_json::Value,
    ) -> Result<Option<Transaction>, PipelineError> {
        let mut state = self.state.lock().await;
        let Some(tx) = state.transactions.get_mut(id) else {
            return Ok(None);
        };
        if tx.status != from {
            return Ok(None);
        }
        tx.status = to;
        tx.event = event.to_string();
        tx.raw_payload = raw_payload.clone();
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn attach_user(&self, id: &TransactionId, user_id: UserId) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.transactions.get_mut(id) {
            tx.user_id = Some(user_id);
            tx.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_fulfillment(
        &self,
        id: &TransactionId,
        fulfillment: &Fulfillment,
    ) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(format!("transaction {id}")))?;
        tx.fulfillment = Some(fulfillment.clone());
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn begin_reconciliation(
        &self,
        id: &TransactionId,
        settled_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, PipelineError> {
        let mut state = self.state.lock().await;
        let Some(tx) = state.transactions.get_mut(id) else {
            return Ok(None);
        };
        if !tx.needs_reconciliation(settled_before) {
            return Ok(None);
        }
        tx.fulfillment = Some(Fulfillment::Reconciling);
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn create_invoice(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
        let mut state = self.state.lock().await;
        let pending = state.transactions.values().find(|t| {
            t.kind == TransactionKind::ManualInvoice
                && t.status == TransactionStatus::Pending
                && t.user_id == tx.user_id
                && t.plan_id == tx.plan_id
        });
        if let Some(existing) = pending {
            return Ok(Recorded::Existing(existing.clone()));
        }
        if let Some(existing) = state.transactions.get(&tx.id) {
            return Ok(Recorded::Existing(existing.clone()));
        }
        let created = tx.clone().into_transaction(Utc::now());
        state.transactions.insert(tx.id.clone(), created.clone());
        Ok(Recorded::Created(created))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, PipelineError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn provision_user(&self, user: &NewUser) -> Result<Provisioned, PipelineError> {
        let mut state = self.state.lock().await;
        let email = normalize_email(&user.email);
        if let Some(existing) = state.users.values().find(|u| u.email == email) {
            return Ok(Provisioned {
                user: existing.clone(),
                created: false,
            });
        }
        let mut new = user.clone();
        new.email = email;
        let created = new.into_user(Utc::now());
        state.users.insert(created.id, created.clone());
        Ok(Provisioned {
            user: created,
            created: true,
        })
    }

    async fn set_founder(&self, id: UserId, founder: bool) -> Result<Option<User>, PipelineError> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&id).map(|u| {
            u.is_founder = founder;
            u.clone()
        }))
    }

    async fn replace_active_subscription(
        &self,
        new: &NewSubscription,
    ) -> Result<Replaced, PipelineError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for sub in state
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == new.user_id && s.status == SubscriptionStatus::Active)
        {
            sub.status = SubscriptionStatus::Cancelled;
            sub.cancel_reason = Some("replaced".into());
            sub.updated_at = now;
            cancelled.push(sub.clone());
        }
        let created = new.clone().into_subscription();
        state.subscriptions.push(created.clone());
        Ok(Replaced { cancelled, created })
    }

    async fn active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn subscription_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<Subscription>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.transaction_id.as_ref() == Some(transaction_id))
            .cloned())
    }

    async fn extend_subscription(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        let mut state = self.state.lock().await;
        let Some(sub) = state.subscriptions.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if sub.status != SubscriptionStatus::Active || sub.expires_at != expected {
            return Ok(None);
        }
        sub.expires_at = Some(expires_at);
        sub.expiry_notice_sent = false;
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }

    async fn latest_expired_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Expired)
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn reactivate_subscription(
        &self,
        expired: &Subscription,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        let mut state = self.state.lock().await;
        if state
            .subscriptions
            .iter()
            .any(|s| s.user_id == expired.user_id && s.status == SubscriptionStatus::Active)
        {
            return Ok(None);
        }
        let Some(sub) = state.subscriptions.iter_mut().find(|s| {
            s.id == expired.id
                && s.status == SubscriptionStatus::Expired
                && s.expires_at == expired.expires_at
        }) else {
            return Ok(None);
        };
        sub.status = SubscriptionStatus::Active;
        sub.expires_at = Some(expires_at);
        sub.expiry_notice_sent = false;
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }

    async fn cancel_subscription(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError> {
        let mut state = self.state.lock().await;
        let Some(sub) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id && s.status == SubscriptionStatus::Active)
        else {
            return Ok(None);
        };
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancel_reason = Some(reason.to_string());
        sub.updated_at = Utc::now();
        Ok(Some(sub.clone()))
    }

    async fn expire_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for sub in state.subscriptions.iter_mut().filter(|s| {
            s.status == SubscriptionStatus::Active && s.expires_at.is_some_and(|at| at <= now)
        }) {
            sub.status = SubscriptionStatus::Expired;
            sub.updated_at = now;
            expired.push(sub.clone());
        }
        Ok(expired)
    }

    async fn flag_expiring_subscriptions(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PipelineError> {
        let mut state = self.state.lock().await;
        let mut flagged = Vec::new();
        for sub in state.subscriptions.iter_mut().filter(|s| {
            s.status == SubscriptionStatus::Active
                && !s.expiry_notice_sent
                && s.expires_at.is_some_and(|at| at > now && at <= before)
        }) {
            sub.expiry_notice_sent = true;
            sub.updated_at = now;
            flagged.push(sub.clone());
        }
        Ok(flagged)
    }

    async fn insert_slot(&self, slot: &NewSlot) -> Result<ProfileSlot, PipelineError> {
        let mut state = self.state.lock().await;
        let created = slot.clone().into_slot(Utc::now());
        state.slots.push(created.clone());
        Ok(created)
    }

    async fn claim_slot(&self, claim: &SlotClaim) -> Result<ClaimResult, PipelineError> {
        let mut state = self.state.lock().await;
        let held: Vec<ProfileSlot> = state
            .slots
            .iter()
            .filter(|s| s.service_id == claim.service_id && s.is_assigned_to(claim.user_id))
            .cloned()
            .collect();
        if held.len() >= claim.cap as usize {
            return Ok(ClaimResult::AtCapacity(held));
        }
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|s| s.service_id == claim.service_id && s.status == SlotStatus::Available)
        else {
            return Ok(ClaimResult::NoneAvailable);
        };
        slot.assign(claim);
        Ok(ClaimResult::Claimed(slot.clone()))
    }

    async fn release_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        let mut state = self.state.lock().await;
        Ok(release_where(&mut state.slots, |s| s.id == id).pop())
    }

    async fn release_slots_for_user(
        &self,
        service_id: &ServiceId,
        user_id: UserId,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        let mut state = self.state.lock().await;
        Ok(release_where(&mut state.slots, |s| {
            &s.service_id == service_id && s.assigned_to == Some(user_id)
        }))
    }

    async fn release_slots_assigned_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        let mut state = self.state.lock().await;
        Ok(release_where(&mut state.slots, |s| {
            s.assigned_at.is_some_and(|at| at < cutoff)
        }))
    }

    async fn get_slot(&self, id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state.slots.iter().find(|s| s.id == id).cloned())
    }

    async fn list_slots(
        &self,
        service_id: &ServiceId,
        status: Option<SlotStatus>,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .slots
            .iter()
            .filter(|s| &s.service_id == service_id && status.is_none_or(|st| s.status == st))
            .cloned()
            .collect())
    }

    async fn add_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
        max_games: Option<u32>,
        at: DateTime<Utc>,
    ) -> Result<SelectionResult, PipelineError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .games
            .iter()
            .find(|g| g.user_id == user_id && g.game_id == game_id)
        {
            return Ok(SelectionResult::AlreadySelected(existing.clone()));
        }
        if let Some(max_games) = max_games {
            let held = state.games.iter().filter(|g| g.user_id == user_id).count();
            if held >= max_games as usize {
                return Ok(SelectionResult::LimitReached { max_games });
            }
        }
        let selection = GameSelection {
            user_id,
            game_id: game_id.to_string(),
            selected_at: at,
        };
        state.games.push(selection.clone());
        Ok(SelectionResult::Added(selection))
    }

    async fn list_game_selections(
        &self,
        user_id: UserId,
    ) -> Result<Vec<GameSelection>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .games
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn remove_game_selection(
        &self,
        user_id: UserId,
        game_id: &str,
    ) -> Result<bool, PipelineError> {
        let mut state = self.state.lock().await;
        let before = state.games.len();
        state
            .games
            .retain(|g| !(g.user_id == user_id && g.game_id == game_id));
        Ok(state.games.len() != before)
    }
}
