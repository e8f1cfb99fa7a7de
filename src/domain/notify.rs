use {
    super::id::{PlanId, UserId},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::Serialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Granted,
    Renewed,
    Cancelled,
    Expiring,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionNotice {
    pub kind: NoticeKind,
    pub user_id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan_id: PlanId,
    pub plan_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Delivery of customer-facing messages (email, WhatsApp).
///
/// Called off the request path; errors are logged by the caller, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &SubscriptionNotice) -> Result<(), String>;
}
