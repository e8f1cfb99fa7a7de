use {
    super::error::PipelineError,
    super::id::{PlanId, ServiceId, SlotId, TransactionId, UserId},
    super::money::Money,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    GamePurchase,
    StreamingPurchase,
    ManualInvoice,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GamePurchase => "game_purchase",
            Self::StreamingPurchase => "streaming_purchase",
            Self::ManualInvoice => "manual_invoice",
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "game_purchase" => Ok(Self::GamePurchase),
            "streaming_purchase" => Ok(Self::StreamingPurchase),
            "manual_invoice" => Ok(Self::ManualInvoice),
            other => Err(PipelineError::Validation(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Unknown,
}

/// Gateway event name → internal status. Lookup is case-insensitive.
const EVENT_STATUS: &[(&str, TransactionStatus)] = &[
    ("pix.created", TransactionStatus::Pending),
    ("pix.pending", TransactionStatus::Pending),
    ("boleto.created", TransactionStatus::Pending),
    ("payment.created", TransactionStatus::Pending),
    ("payment.pending", TransactionStatus::Pending),
    ("waiting_payment", TransactionStatus::Pending),
    ("pix.paid", TransactionStatus::Paid),
    ("boleto.paid", TransactionStatus::Paid),
    ("card.approved", TransactionStatus::Paid),
    ("payment.approved", TransactionStatus::Paid),
    ("payment.succeeded", TransactionStatus::Paid),
    ("purchase.approved", TransactionStatus::Paid),
    ("order.paid", TransactionStatus::Paid),
    ("invoice.paid", TransactionStatus::Paid),
    ("pix.expired", TransactionStatus::Failed),
    ("card.declined", TransactionStatus::Failed),
    ("card.refused", TransactionStatus::Failed),
    ("payment.failed", TransactionStatus::Failed),
    ("payment.canceled", TransactionStatus::Failed),
    ("payment.cancelled", TransactionStatus::Failed),
    ("pix.refunded", TransactionStatus::Refunded),
    ("card.refunded", TransactionStatus::Refunded),
    ("payment.refunded", TransactionStatus::Refunded),
    ("payment.chargeback", TransactionStatus::Refunded),
    ("chargeback", TransactionStatus::Refunded),
];

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Unknown => "unknown",
        }
    }

    /// Unmapped events fall to `Unknown`; they are recorded but never trigger side effects.
    pub fn from_event(event: &str) -> Self {
        let event = event.trim();
        EVENT_STATUS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(event))
            .map(|(_, status)| *status)
            .unwrap_or(Self::Unknown)
    }

    /// Pending and unknown records may still be advanced by a later event.
    /// Paid may only move on to refunded. Everything else is terminal.
    pub fn can_transition_to(&self, next: &TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending | Unknown, Paid | Failed | Refunded) | (Unknown, Pending) | (Paid, Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TransactionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "unknown" => Ok(Self::Unknown),
            other => Err(PipelineError::Validation(format!(
                "unknown transaction status: {other}"
            ))),
        }
    }
}

/// What the pipeline did for a transaction. Stored on the record and
/// returned verbatim when the same event is delivered again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Fulfillment {
    Granted {
        subscription_id: Uuid,
        plan_id: PlanId,
        slot_id: Option<SlotId>,
        via_fallback: bool,
    },
    NoSlotAvailable {
        subscription_id: Uuid,
        service_id: ServiceId,
    },
    /// User was at the slot cap; nothing was granted. Carries the
    /// subscription that stayed active, if any.
    AlreadyAssigned {
        subscription_id: Option<Uuid>,
        service_id: ServiceId,
    },
    /// Product matched only by keyword and fallback matches are held for an operator.
    Held { reason: String },
    Unresolved { reason: String },
    Cancelled { subscription_id: Option<Uuid> },
    /// Status recorded, nothing else to do (pending, unknown events).
    Recorded,
    /// Claimed by a manual reconciliation run.
    Reconciling,
    Failed { error: String },
}

impl Fulfillment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted { .. } => "granted",
            Self::NoSlotAvailable { .. } => "no_slot_available",
            Self::AlreadyAssigned { .. } => "already_assigned",
            Self::Held { .. } => "held",
            Self::Unresolved { .. } => "unresolved",
            Self::Cancelled { .. } => "cancelled",
            Self::Recorded => "recorded",
            Self::Reconciling => "reconciling",
            Self::Failed { .. } => "failed",
        }
    }

    /// Outcomes of a finished run that left a paid customer without an
    /// entitlement. An operator may re-run these at any time.
    pub const RECONCILABLE: &'static [&'static str] =
        &["no_slot_available", "held", "unresolved", "failed"];

    pub fn is_reconcilable(&self) -> bool {
        Self::RECONCILABLE.contains(&self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub event: String,
    pub status: TransactionStatus,
    pub customer_email: String,
    pub money: Money,
    pub user_id: Option<UserId>,
    pub plan_id: Option<PlanId>,
    pub service_id: Option<ServiceId>,
    pub fulfillment: Option<Fulfillment>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Paid, and either fulfilled with an outcome that left the customer
    /// without an entitlement, or never fulfilled and untouched since
    /// `settled_before`. A younger record may still have a delivery in flight.
    pub fn needs_reconciliation(&self, settled_before: DateTime<Utc>) -> bool {
        if self.status != TransactionStatus::Paid {
            return false;
        }
        match &self.fulfillment {
            Some(Fulfillment::Recorded) | None => self.updated_at <= settled_before,
            Some(outcome) => outcome.is_reconcilable(),
        }
    }
}

/// For INSERT: the first sighting of a transaction id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub event: String,
    pub status: TransactionStatus,
    pub customer_email: String,
    pub money: Money,
    pub user_id: Option<UserId>,
    pub plan_id: Option<PlanId>,
    pub service_id: Option<ServiceId>,
    pub raw_payload: serde_json::Value,
}

impl NewTransaction {
    pub fn into_transaction(self, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: self.id,
            kind: self.kind,
            event: self.event,
            status: self.status,
            customer_email: self.customer_email,
            money: self.money,
            user_id: self.user_id,
            plan_id: self.plan_id,
            service_id: self.service_id,
            fulfillment: None,
            raw_payload: self.raw_payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of the insert-if-absent on the transaction id.
#[derive(Debug, Clone)]
pub enum Recorded {
    Created(Transaction),
    Existing(Transaction),
}

impl Recorded {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Created(t) | Self::Existing(t) => t,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}
