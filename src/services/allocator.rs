use {
    crate::domain::catalog::Catalog,
    crate::domain::error::PipelineError,
    crate::domain::id::{ServiceId, SlotId, TransactionId, UserId},
    crate::domain::ledger::Ledger,
    crate::domain::slot::{ClaimResult, NewSlot, ProfileSlot, SlotClaim, SlotStatus},
    chrono::Utc,
    std::sync::Arc,
};

/// Hands out profile slots of shared streaming accounts.
pub struct SlotAllocator {
    ledger: Arc<dyn Ledger>,
    catalog: Arc<Catalog>,
}

impl SlotAllocator {
    pub fn new(ledger: Arc<dyn Ledger>, catalog: Arc<Catalog>) -> Self {
        Self { ledger, catalog }
    }

    /// Move one available slot of `service_id` to `user_id`.
    ///
    /// The selection and the assignment are a single conditional update in
    /// the ledger: two concurrent claims never receive the same slot, and a
    /// user never ends up above `cap` slots of the service.
    pub async fn claim(
        &self,
        service_id: &ServiceId,
        user_id: UserId,
        transaction_id: Option<&TransactionId>,
        cap: u32,
    ) -> Result<ProfileSlot, PipelineError> {
        self.require_service(service_id)?;
        let claim = SlotClaim {
            service_id: service_id.clone(),
            user_id,
            transaction_id: transaction_id.cloned(),
            at: Utc::now(),
            cap,
        };

        match self.ledger.claim_slot(&claim).await? {
            ClaimResult::Claimed(slot) => {
                tracing::info!(
                    slot_id = %slot.id,
                    service_id = %service_id,
                    user_id = %user_id,
                    "slot assigned"
                );
                Ok(slot)
            }
            ClaimResult::NoneAvailable => Err(PipelineError::NoSlotAvailable(service_id.clone())),
            ClaimResult::AtCapacity(held) => {
                tracing::debug!(
                    service_id = %service_id,
                    user_id = %user_id,
                    held = held.len(),
                    "user already at slot cap"
                );
                Err(PipelineError::AlreadyAssigned {
                    user_id,
                    service_id: service_id.clone(),
                })
            }
        }
    }

    /// Return a slot to the pool. Releasing an available slot is a no-op.
    pub async fn release(&self, slot_id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        let released = self.ledger.release_slot(slot_id).await?;
        if let Some(slot) = &released {
            tracing::info!(slot_id = %slot_id, previous_user = ?slot.assigned_to, "slot released");
        }
        Ok(released)
    }

    pub async fn release_for_user(
        &self,
        service_id: &ServiceId,
        user_id: UserId,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        let released = self.ledger.release_slots_for_user(service_id, user_id).await?;
        if !released.is_empty() {
            tracing::info!(
                service_id = %service_id,
                user_id = %user_id,
                count = released.len(),
                "user slots released"
            );
        }
        Ok(released)
    }

    /// Admin override. Unlike `release`, an unknown slot is an error.
    pub async fn unassign(&self, slot_id: SlotId) -> Result<Option<ProfileSlot>, PipelineError> {
        if self.ledger.get_slot(slot_id).await?.is_none() {
            return Err(PipelineError::NotFound(format!("slot {slot_id}")));
        }
        let released = self.release(slot_id).await?;
        if released.is_some() {
            tracing::warn!(slot_id = %slot_id, "slot unassigned by operator");
        }
        Ok(released)
    }

    pub async fn add_slot(
        &self,
        service_id: &ServiceId,
        account_id: &str,
        label: Option<String>,
    ) -> Result<ProfileSlot, PipelineError> {
        self.require_service(service_id)?;
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(PipelineError::Validation("account_id must not be empty".into()));
        }
        let slot = self
            .ledger
            .insert_slot(&NewSlot::new(service_id.clone(), account_id, label))
            .await?;
        tracing::info!(slot_id = %slot.id, service_id = %service_id, "slot added");
        Ok(slot)
    }

    pub async fn list_assigned(&self, service_id: &ServiceId) -> Result<Vec<ProfileSlot>, PipelineError> {
        self.list(service_id, Some(SlotStatus::Assigned)).await
    }

    pub async fn list(
        &self,
        service_id: &ServiceId,
        status: Option<SlotStatus>,
    ) -> Result<Vec<ProfileSlot>, PipelineError> {
        self.require_service(service_id)?;
        self.ledger.list_slots(service_id, status).await
    }

    fn require_service(&self, service_id: &ServiceId) -> Result<(), PipelineError> {
        match self.catalog.service(service_id) {
            Some(_) => Ok(()),
            None => Err(PipelineError::NotFound(format!("service {service_id}"))),
        }
    }
}
