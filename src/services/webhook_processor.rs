//! Turns one gateway delivery into at most one entitlement grant and one
//! slot claim, no matter how many times it is delivered.

use {
    crate::domain::catalog::{Catalog, Resolution, Target},
    crate::domain::error::PipelineError,
    crate::domain::id::TransactionId,
    crate::domain::ledger::Ledger,
    crate::domain::transaction::{Fulfillment, Transaction, TransactionKind, TransactionStatus},
    crate::domain::user::{NewUser, User},
    crate::domain::webhook::IncomingEvent,
    crate::infra::signature,
    crate::services::allocator::SlotAllocator,
    crate::services::entitlements::EntitlementManager,
    crate::services::idempotency::{Admission, IdempotencyGuard},
    chrono::{DateTime, TimeDelta, Utc},
    std::{sync::Arc, time::Duration},
};

#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// This delivery owned the side effects. `fulfillment` is set.
    Processed(Transaction),
    /// Replay; nothing was executed. Carries the stored record.
    Duplicate(Transaction),
}

impl ProcessResult {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Processed(t) | Self::Duplicate(t) => t,
        }
    }

    /// Short status for the webhook response body.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "already_processed",
            Self::Processed(t) => match &t.fulfillment {
                Some(Fulfillment::Granted { .. }) => "processed",
                Some(Fulfillment::Failed { .. }) => "fulfillment_failed",
                Some(other) => other.as_str(),
                None => "recorded",
            },
        }
    }
}

pub struct WebhookProcessor {
    ledger: Arc<dyn Ledger>,
    catalog: Arc<Catalog>,
    guard: IdempotencyGuard,
    entitlements: Arc<EntitlementManager>,
    allocator: Arc<SlotAllocator>,
    secret: Option<String>,
    hold_fallback: bool,
    reconcile_grace: Duration,
}

impl WebhookProcessor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        catalog: Arc<Catalog>,
        entitlements: Arc<EntitlementManager>,
        allocator: Arc<SlotAllocator>,
        secret: Option<String>,
        hold_fallback: bool,
        reconcile_grace: Duration,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&ledger)),
            ledger,
            catalog,
            entitlements,
            allocator,
            secret,
            hold_fallback,
            reconcile_grace,
        }
    }

    /// Verify, parse and process one raw webhook body.
    pub async fn process(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ProcessResult, PipelineError> {
        if let Some(secret) = &self.secret {
            signature::verify(secret, body, signature_header)?;
        }
        let incoming = IncomingEvent::parse(body, &self.catalog)?;
        self.process_event(&incoming).await
    }

    pub async fn process_event(
        &self,
        incoming: &IncomingEvent,
    ) -> Result<ProcessResult, PipelineError> {
        // Direct payloads name the user; an unknown one is rejected before
        // anything is recorded.
        if let Some(user_id) = incoming.user_id {
            if self.ledger.get_user(user_id).await?.is_none() {
                return Err(PipelineError::Validation(format!("unknown user_id: {user_id}")));
            }
        }

        let tx = match self.guard.admit(&incoming.new_transaction()).await? {
            Admission::Duplicate(existing) => {
                tracing::info!(
                    transaction_id = %existing.id,
                    status = %existing.status,
                    event = %incoming.event,
                    "duplicate delivery, skipping"
                );
                return Ok(ProcessResult::Duplicate(existing));
            }
            Admission::Proceed(tx) => tx,
        };

        let outcome = match tx.status {
            TransactionStatus::Paid => {
                self.fulfil(&tx, &incoming.resolution, incoming.name.clone())
                    .await
            }
            TransactionStatus::Failed | TransactionStatus::Refunded => self
                .entitlements
                .cancel_for_transaction(&tx.id, tx.status.as_str())
                .await
                .map(|cancelled| Fulfillment::Cancelled {
                    subscription_id: cancelled.map(|s| s.id),
                }),
            TransactionStatus::Unknown => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    event = %tx.event,
                    "unmapped gateway event recorded without side effects"
                );
                Ok(Fulfillment::Recorded)
            }
            TransactionStatus::Pending => Ok(Fulfillment::Recorded),
        };

        self.finish(tx, outcome).await.map(ProcessResult::Processed)
    }

    /// Re-run fulfilment for a paid transaction left without an entitlement.
    /// `target` overrides what was stored on the transaction. A transaction
    /// with no outcome is only taken over once it has been quiet for the
    /// reconcile grace period.
    pub async fn reconcile(
        &self,
        id: &TransactionId,
        target: Option<Target>,
    ) -> Result<Transaction, PipelineError> {
        let settled_before = TimeDelta::from_std(self.reconcile_grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let Some(tx) = self.ledger.begin_reconciliation(id, settled_before).await? else {
            return match self.ledger.get_transaction(id).await? {
                None => Err(PipelineError::NotFound(format!("transaction {id}"))),
                Some(tx) => Err(PipelineError::Conflict(format!(
                    "transaction {id} is not awaiting reconciliation (status {}, fulfillment {})",
                    tx.status,
                    tx.fulfillment.as_ref().map_or("none", Fulfillment::as_str),
                ))),
            };
        };
        tracing::warn!(transaction_id = %id, "manual reconciliation started");

        let resolution = target.map_or(Resolution::Unresolved, Resolution::Exact);
        let outcome = self.fulfil_target(&tx, &resolution, None, false).await;
        self.finish(tx, outcome).await
    }

    async fn finish(
        &self,
        mut tx: Transaction,
        outcome: Result<Fulfillment, PipelineError>,
    ) -> Result<Transaction, PipelineError> {
        let fulfillment = outcome.unwrap_or_else(|e| {
            tracing::error!(
                critical = true,
                transaction_id = %tx.id,
                user_id = ?tx.user_id,
                service_id = ?tx.service_id,
                plan_id = ?tx.plan_id,
                error = %e,
                "fulfilment failed after the transaction was recorded; manual reconciliation required"
            );
            Fulfillment::Failed {
                error: e.to_string(),
            }
        });

        if let Err(e) = self.ledger.set_fulfillment(&tx.id, &fulfillment).await {
            tracing::error!(
                critical = true,
                transaction_id = %tx.id,
                outcome = fulfillment.as_str(),
                error = %e,
                "could not record fulfilment outcome"
            );
            return Err(e);
        }
        tx.fulfillment = Some(fulfillment);
        Ok(tx)
    }

    async fn fulfil(
        &self,
        tx: &Transaction,
        resolution: &Resolution,
        name: Option<String>,
    ) -> Result<Fulfillment, PipelineError> {
        let user = self.resolve_user(tx, name).await?;
        self.fulfil_target(tx, resolution, Some(user), self.hold_fallback)
            .await
    }

    async fn fulfil_target(
        &self,
        tx: &Transaction,
        resolution: &Resolution,
        user: Option<User>,
        hold_fallback: bool,
    ) -> Result<Fulfillment, PipelineError> {
        let user = match user {
            Some(user) => user,
            None => self.resolve_user(tx, None).await?,
        };
        if tx.user_id != Some(user.id) {
            self.ledger.attach_user(&tx.id, user.id).await?;
        }

        let Some((target, via_fallback)) = self.choose_target(tx, resolution) else {
            tracing::error!(
                critical = true,
                transaction_id = %tx.id,
                user_id = %user.id,
                "paid transaction matches no plan or service"
            );
            return Ok(Fulfillment::Unresolved {
                reason: "no catalog entry matches the purchased products".into(),
            });
        };

        if via_fallback {
            if let Resolution::Fallback { keyword, .. } = resolution {
                tracing::warn!(
                    transaction_id = %tx.id,
                    keyword = %keyword,
                    target = ?target,
                    hold = hold_fallback,
                    "product matched by keyword only"
                );
                if hold_fallback {
                    return Ok(Fulfillment::Held {
                        reason: format!("keyword match on '{keyword}' awaits confirmation"),
                    });
                }
            }
        }

        let plan = self
            .catalog
            .plan_for(&target)
            .ok_or_else(|| PipelineError::NotFound(format!("plan for {target:?}")))?;

        let service_id = match target {
            Target::Game(plan_id) => {
                let subscription = self
                    .entitlements
                    .grant(user.id, &plan.id, Some(&tx.id), plan.duration_months)
                    .await?;
                return Ok(Fulfillment::Granted {
                    subscription_id: subscription.id,
                    plan_id,
                    slot_id: None,
                    via_fallback,
                });
            }
            Target::Streaming(service_id) => service_id,
        };

        // Claim first: a user at the slot cap keeps the subscription they hold.
        let cap = self.entitlements.slot_cap(Some(&plan.id));
        let slot = match self
            .allocator
            .claim(&service_id, user.id, Some(&tx.id), cap)
            .await
        {
            Ok(slot) => Some(slot),
            Err(PipelineError::NoSlotAvailable(_)) => None,
            Err(PipelineError::AlreadyAssigned {
                user_id,
                service_id,
            }) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    user_id = %user_id,
                    service_id = %service_id,
                    "user already holds a slot for this service; no second slot assigned"
                );
                let current = self.ledger.active_subscription(user_id).await?;
                return Ok(Fulfillment::AlreadyAssigned {
                    subscription_id: current.map(|s| s.id),
                    service_id,
                });
            }
            Err(e) => return Err(e),
        };

        let subscription = match self
            .entitlements
            .grant(user.id, &plan.id, Some(&tx.id), plan.duration_months)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Some(slot) = &slot {
                    if let Err(release_err) = self.allocator.release(slot.id).await {
                        tracing::error!(
                            critical = true,
                            transaction_id = %tx.id,
                            slot_id = %slot.id,
                            error = %release_err,
                            "grant failed and the claimed slot could not be returned"
                        );
                    }
                }
                return Err(e);
            }
        };

        match slot {
            Some(slot) => Ok(Fulfillment::Granted {
                subscription_id: subscription.id,
                plan_id: plan.id.clone(),
                slot_id: Some(slot.id),
                via_fallback,
            }),
            None => {
                tracing::error!(
                    critical = true,
                    transaction_id = %tx.id,
                    user_id = %user.id,
                    service_id = %service_id,
                    "no profile slot available for a paid purchase; restock and reconcile"
                );
                Ok(Fulfillment::NoSlotAvailable {
                    subscription_id: subscription.id,
                    service_id,
                })
            }
        }
    }

    /// Invoices are fulfilled against the plan they were issued for. Otherwise
    /// the payload's resolution wins, and the stored target covers payloads
    /// that carried no products.
    fn choose_target(&self, tx: &Transaction, resolution: &Resolution) -> Option<(Target, bool)> {
        let stored = stored_target(tx);
        if tx.kind == TransactionKind::ManualInvoice {
            if let Some(stored) = stored {
                return Some((stored, false));
            }
        }
        match resolution {
            Resolution::Exact(target) => Some((target.clone(), false)),
            Resolution::Fallback { target, .. } => Some((target.clone(), true)),
            Resolution::Unresolved => stored.map(|t| (t, false)),
        }
    }

    async fn resolve_user(
        &self,
        tx: &Transaction,
        name: Option<String>,
    ) -> Result<User, PipelineError> {
        if let Some(user_id) = tx.user_id {
            return self
                .ledger
                .get_user(user_id)
                .await?
                .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")));
        }
        if tx.customer_email.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "transaction {} carries neither user nor email",
                tx.id
            )));
        }

        let provisioned = self
            .ledger
            .provision_user(&NewUser::placeholder(&tx.customer_email, name))
            .await?;
        if provisioned.created {
            tracing::info!(
                user_id = %provisioned.user.id,
                transaction_id = %tx.id,
                "placeholder account provisioned for first-time payer"
            );
        }
        Ok(provisioned.user)
    }
}

fn stored_target(tx: &Transaction) -> Option<Target> {
    match (&tx.service_id, &tx.plan_id) {
        (Some(service_id), _) => Some(Target::Streaming(service_id.clone())),
        (None, Some(plan_id)) => Some(Target::Game(plan_id.clone())),
        (None, None) => None,
    }
}
