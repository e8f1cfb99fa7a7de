use {
    super::error::PipelineError,
    super::id::{PlanId, TransactionId, UserId},
    chrono::{DateTime, Months, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<TransactionId>,
    pub cancel_reason: Option<String>,
    pub expiry_notice_sent: bool,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and not past its expiry. A `None` expiry never lapses.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at.is_none_or(|at| at > now)
    }

    /// Renewal extends from whichever is later: the current expiry or now.
    /// A lapsed subscription restarts its clock instead of compounding a past date.
    pub fn renewed_expiry(
        &self,
        now: DateTime<Utc>,
        months: u32,
    ) -> Result<DateTime<Utc>, PipelineError> {
        let base = self.expires_at.map_or(now, |at| at.max(now));
        add_months(base, months)
    }
}

pub fn add_months(at: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, PipelineError> {
    at.checked_add_months(Months::new(months))
        .ok_or_else(|| PipelineError::Validation(format!("expiry overflow adding {months} months")))
}

/// For INSERT: id generated in Rust via Uuid::now_v7().
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<TransactionId>,
}

impl NewSubscription {
    pub fn for_months(
        user_id: UserId,
        plan_id: PlanId,
        transaction_id: Option<TransactionId>,
        now: DateTime<Utc>,
        months: u32,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            plan_id,
            started_at: now,
            expires_at: Some(add_months(now, months)?),
            transaction_id,
        })
    }

    pub fn into_subscription(self) -> Subscription {
        Subscription {
            id: self.id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            status: SubscriptionStatus::Active,
            started_at: self.started_at,
            expires_at: self.expires_at,
            transaction_id: self.transaction_id,
            cancel_reason: None,
            expiry_notice_sent: false,
            updated_at: self.started_at,
        }
    }
}

/// Outcome of the cancel-then-insert step of a grant.
#[derive(Debug, Clone)]
pub struct Replaced {
    pub cancelled: Vec<Subscription>,
    pub created: Subscription,
}
