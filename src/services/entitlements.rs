use {
    crate::domain::catalog::Catalog,
    crate::domain::error::PipelineError,
    crate::domain::game::{GameSelection, SelectionResult},
    crate::domain::id::{PlanId, TransactionId, UserId},
    crate::domain::ledger::Ledger,
    crate::domain::notify::{NoticeKind, Notifier, SubscriptionNotice},
    crate::domain::subscription::{NewSubscription, Subscription, SubscriptionStatus},
    crate::domain::user::User,
    chrono::Utc,
    serde::Serialize,
    std::sync::Arc,
};

const RENEW_ATTEMPTS: usize = 3;

/// What the UI needs to gate a user.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementStatus {
    pub user_id: UserId,
    pub entitled: bool,
    pub founder: bool,
    pub subscription: Option<Subscription>,
}

/// Owns subscription lifecycle and the game selections hanging off it.
pub struct EntitlementManager {
    ledger: Arc<dyn Ledger>,
    catalog: Arc<Catalog>,
    notifier: Arc<dyn Notifier>,
    default_slot_cap: u32,
}

impl EntitlementManager {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        catalog: Arc<Catalog>,
        notifier: Arc<dyn Notifier>,
        default_slot_cap: u32,
    ) -> Self {
        Self {
            ledger,
            catalog,
            notifier,
            default_slot_cap,
        }
    }

    /// Cancel whatever the user has active and start `plan_id` from now.
    /// After this returns the user has exactly one active subscription.
    pub async fn grant(
        &self,
        user_id: UserId,
        plan_id: &PlanId,
        transaction_id: Option<&TransactionId>,
        duration_months: u32,
    ) -> Result<Subscription, PipelineError> {
        if self.catalog.plan(plan_id).is_none() {
            return Err(PipelineError::NotFound(format!("plan {plan_id}")));
        }
        let new = NewSubscription::for_months(
            user_id,
            plan_id.clone(),
            transaction_id.cloned(),
            Utc::now(),
            duration_months,
        )?;

        let replaced = self.ledger.replace_active_subscription(&new).await?;
        for old in &replaced.cancelled {
            tracing::info!(
                user_id = %user_id,
                subscription_id = %old.id,
                plan_id = %old.plan_id,
                "previous subscription replaced"
            );
        }
        tracing::info!(
            user_id = %user_id,
            subscription_id = %replaced.created.id,
            plan_id = %plan_id,
            expires_at = ?replaced.created.expires_at,
            "subscription granted"
        );

        self.send_notice(NoticeKind::Granted, &replaced.created);
        Ok(replaced.created)
    }

    /// Extend the active subscription by `months`. With none active, the
    /// most recently expired one is revived and restarts from now.
    pub async fn renew(&self, user_id: UserId, months: u32) -> Result<Subscription, PipelineError> {
        if months == 0 {
            return Err(PipelineError::Validation("months must be positive".into()));
        }
        for _ in 0..RENEW_ATTEMPTS {
            let Some(current) = self.ledger.active_subscription(user_id).await? else {
                if let Some(revived) = self.revive(user_id, months).await? {
                    return Ok(revived);
                }
                tracing::debug!(user_id = %user_id, "revival lost a race, retrying");
                continue;
            };

            // Open-ended subscriptions have nothing to extend.
            if current.expires_at.is_none() {
                return Ok(current);
            }

            let expires_at = current.renewed_expiry(Utc::now(), months)?;
            if let Some(renewed) = self
                .ledger
                .extend_subscription(current.id, current.expires_at, expires_at)
                .await?
            {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %renewed.id,
                    expires_at = %expires_at,
                    "subscription renewed"
                );
                self.send_notice(NoticeKind::Renewed, &renewed);
                return Ok(renewed);
            }
            tracing::debug!(user_id = %user_id, "renewal lost a race, retrying");
        }
        Err(PipelineError::Conflict(format!(
            "subscription of {user_id} changed concurrently"
        )))
    }

    /// `Ok(None)` when the expired row changed or another subscription became
    /// active in the meantime.
    async fn revive(
        &self,
        user_id: UserId,
        months: u32,
    ) -> Result<Option<Subscription>, PipelineError> {
        let expired = self
            .ledger
            .latest_expired_subscription(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("subscription for {user_id}")))?;

        let expires_at = expired.renewed_expiry(Utc::now(), months)?;
        let revived = self
            .ledger
            .reactivate_subscription(&expired, expires_at)
            .await?;
        if let Some(revived) = &revived {
            tracing::info!(
                user_id = %user_id,
                subscription_id = %revived.id,
                expires_at = %expires_at,
                "expired subscription renewed"
            );
            self.send_notice(NoticeKind::Renewed, revived);
        }
        Ok(revived)
    }

    /// Cancel the active subscription. `Ok(None)` when there is none.
    pub async fn cancel(
        &self,
        user_id: UserId,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError> {
        match self.ledger.active_subscription(user_id).await? {
            Some(active) => self.cancel_one(&active, reason).await,
            None => Ok(None),
        }
    }

    /// Cancel the subscription a transaction created, if it is still active.
    pub async fn cancel_for_transaction(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError> {
        match self.ledger.subscription_for_transaction(transaction_id).await? {
            Some(sub) if sub.status == SubscriptionStatus::Active => {
                self.cancel_one(&sub, reason).await
            }
            _ => Ok(None),
        }
    }

    async fn cancel_one(
        &self,
        sub: &Subscription,
        reason: &str,
    ) -> Result<Option<Subscription>, PipelineError> {
        let cancelled = self.ledger.cancel_subscription(sub.id, reason).await?;
        if let Some(cancelled) = &cancelled {
            tracing::info!(
                user_id = %cancelled.user_id,
                subscription_id = %cancelled.id,
                reason,
                "subscription cancelled"
            );
            self.send_notice(NoticeKind::Cancelled, cancelled);
        }
        Ok(cancelled)
    }

    pub async fn is_entitled(&self, user_id: UserId) -> Result<bool, PipelineError> {
        Ok(self.status(user_id).await?.entitled)
    }

    pub async fn subscription(&self, user_id: UserId) -> Result<Option<Subscription>, PipelineError> {
        self.ledger.active_subscription(user_id).await
    }

    pub async fn status(&self, user_id: UserId) -> Result<EntitlementStatus, PipelineError> {
        let user = self.require_user(user_id).await?;
        let subscription = self.ledger.active_subscription(user_id).await?;
        let now = Utc::now();
        let entitled = user.is_founder || subscription.as_ref().is_some_and(|s| s.is_current(now));
        Ok(EntitlementStatus {
            user_id,
            entitled,
            founder: user.is_founder,
            subscription,
        })
    }

    /// Slots per service a holder of `plan_id` may occupy.
    pub fn slot_cap(&self, plan_id: Option<&PlanId>) -> u32 {
        plan_id
            .and_then(|id| self.catalog.plan(id))
            .and_then(|plan| plan.slots_per_service)
            .unwrap_or(self.default_slot_cap)
            .max(1)
    }

    pub async fn set_founder(&self, user_id: UserId, founder: bool) -> Result<User, PipelineError> {
        let user = self
            .ledger
            .set_founder(user_id, founder)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;
        tracing::info!(user_id = %user_id, founder, "founder flag updated");
        Ok(user)
    }

    // ── game selections ───────────────────────────────────────────────────

    /// Founders without a subscription select without a cap.
    pub async fn select_game(
        &self,
        user_id: UserId,
        game_id: &str,
    ) -> Result<GameSelection, PipelineError> {
        let game_id = game_id.trim();
        if game_id.is_empty() {
            return Err(PipelineError::Validation("game_id must not be empty".into()));
        }

        let status = self.status(user_id).await?;
        if !status.entitled {
            return Err(PipelineError::NotEntitled(user_id));
        }
        let max_games = status
            .subscription
            .as_ref()
            .filter(|s| s.is_current(Utc::now()))
            .and_then(|s| self.catalog.plan(&s.plan_id))
            .and_then(|plan| plan.max_games);

        match self
            .ledger
            .add_game_selection(user_id, game_id, max_games, Utc::now())
            .await?
        {
            SelectionResult::Added(selection) => {
                tracing::info!(user_id = %user_id, game_id, "game selected");
                Ok(selection)
            }
            SelectionResult::AlreadySelected(selection) => Ok(selection),
            SelectionResult::LimitReached { max_games } => {
                Err(PipelineError::GameLimitReached { max_games })
            }
        }
    }

    pub async fn games(&self, user_id: UserId) -> Result<Vec<GameSelection>, PipelineError> {
        self.ledger.list_game_selections(user_id).await
    }

    pub async fn remove_game(&self, user_id: UserId, game_id: &str) -> Result<bool, PipelineError> {
        self.ledger.remove_game_selection(user_id, game_id).await
    }

    async fn require_user(&self, user_id: UserId) -> Result<User, PipelineError> {
        self.ledger
            .get_user(user_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))
    }

    /// Fire-and-forget: the caller never waits on delivery.
    pub(crate) fn send_notice(&self, kind: NoticeKind, sub: &Subscription) {
        let ledger = Arc::clone(&self.ledger);
        let notifier = Arc::clone(&self.notifier);
        let plan_name = self.catalog.plan(&sub.plan_id).map(|p| p.name.clone());
        let user_id = sub.user_id;
        let plan_id = sub.plan_id.clone();
        let expires_at = sub.expires_at;

        tokio::spawn(async move {
            let user = match ledger.get_user(user_id).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "notice skipped: user lookup failed");
                    return;
                }
            };
            let notice = SubscriptionNotice {
                kind,
                user_id,
                email: user.as_ref().map(|u| u.email.clone()),
                name: user.and_then(|u| u.name),
                plan_id,
                plan_name,
                expires_at,
            };
            if let Err(e) = notifier.notify(&notice).await {
                tracing::warn!(user_id = %user_id, kind = ?kind, error = %e, "notice delivery failed");
            }
        });
    }
}
