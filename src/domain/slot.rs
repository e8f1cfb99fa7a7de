use {
    super::error::PipelineError,
    super::id::{ServiceId, SlotId, TransactionId, UserId},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Assigned,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SlotStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "available" => Ok(Self::Available),
            "assigned" => Ok(Self::Assigned),
            other => Err(PipelineError::Validation(format!(
                "unknown slot status: {other}"
            ))),
        }
    }
}

/// One profile on a shared third-party account.
///
/// `assigned_to` is `Some` iff `status == Assigned`; both stores enforce it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProfileSlot {
    pub id: SlotId,
    pub service_id: ServiceId,
    pub account_id: String,
    pub label: Option<String>,
    pub status: SlotStatus,
    pub assigned_to: Option<UserId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl ProfileSlot {
    pub fn is_assigned_to(&self, user_id: UserId) -> bool {
        self.status == SlotStatus::Assigned && self.assigned_to == Some(user_id)
    }

    pub(crate) fn assign(&mut self, claim: &SlotClaim) {
        self.status = SlotStatus::Assigned;
        self.assigned_to = Some(claim.user_id);
        self.assigned_at = Some(claim.at);
        self.transaction_id = claim.transaction_id.clone();
    }

    pub(crate) fn clear(&mut self) {
        self.status = SlotStatus::Available;
        self.assigned_to = None;
        self.assigned_at = None;
        self.transaction_id = None;
    }
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub id: SlotId,
    pub service_id: ServiceId,
    pub account_id: String,
    pub label: Option<String>,
}

impl NewSlot {
    pub fn new(service_id: ServiceId, account_id: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: SlotId::new(),
            service_id,
            account_id: account_id.into(),
            label,
        }
    }

    pub fn into_slot(self, now: DateTime<Utc>) -> ProfileSlot {
        ProfileSlot {
            id: self.id,
            service_id: self.service_id,
            account_id: self.account_id,
            label: self.label,
            status: SlotStatus::Available,
            assigned_to: None,
            assigned_at: None,
            transaction_id: None,
            created_at: now,
        }
    }
}

/// A request to move one available slot of `service_id` to `user_id`.
#[derive(Debug, Clone)]
pub struct SlotClaim {
    pub service_id: ServiceId,
    pub user_id: UserId,
    pub transaction_id: Option<TransactionId>,
    pub at: DateTime<Utc>,
    /// Slots of this service the user may hold at once.
    pub cap: u32,
}

#[derive(Debug, Clone)]
pub enum ClaimResult {
    Claimed(ProfileSlot),
    NoneAvailable,
    /// The user already holds `cap` slots of the service.
    AtCapacity(Vec<ProfileSlot>),
}
