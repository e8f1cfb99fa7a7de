use {
    crate::domain::error::PipelineError,
    crate::domain::id::TransactionId,
    crate::domain::ledger::Ledger,
    crate::domain::transaction::{NewTransaction, Recorded, Transaction},
    std::sync::Arc,
};

/// Whether the caller owns the side effects of this delivery.
#[derive(Debug, Clone)]
pub enum Admission {
    /// First sighting of the id, or the delivery moved the status forward.
    Proceed(Transaction),
    /// Already seen at this status (or a later one). Carries the stored record.
    Duplicate(Transaction),
}

/// Deduplicates webhook deliveries on the gateway transaction id.
#[derive(Clone)]
pub struct IdempotencyGuard {
    ledger: Arc<dyn Ledger>,
}

impl IdempotencyGuard {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn is_processed(&self, id: &TransactionId) -> Result<bool, PipelineError> {
        Ok(self.ledger.get_transaction(id).await?.is_some())
    }

    /// Insert-if-absent. Exactly one of any number of concurrent callers
    /// sees `Recorded::Created` for a given id.
    pub async fn record_if_new(&self, tx: &NewTransaction) -> Result<Recorded, PipelineError> {
        self.ledger.record_transaction(tx).await
    }

    /// Record the delivery, or advance an existing record whose status allows
    /// the incoming one. The status change is a compare-and-set, so a losing
    /// racer gets `Duplicate`.
    pub async fn admit(&self, tx: &NewTransaction) -> Result<Admission, PipelineError> {
        let existing = match self.record_if_new(tx).await? {
            Recorded::Created(created) => return Ok(Admission::Proceed(created)),
            Recorded::Existing(existing) => existing,
        };

        if !existing.status.can_transition_to(&tx.status) {
            return Ok(Admission::Duplicate(existing));
        }

        let advanced = self
            .ledger
            .advance_transaction(&tx.id, existing.status, tx.status, &tx.event, &tx.raw_payload)
            .await?;

        match advanced {
            Some(advanced) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    from = %existing.status,
                    to = %advanced.status,
                    "transaction status advanced"
                );
                Ok(Admission::Proceed(advanced))
            }
            None => {
                let current = self
                    .ledger
                    .get_transaction(&tx.id)
                    .await?
                    .unwrap_or(existing);
                Ok(Admission::Duplicate(current))
            }
        }
    }
}
