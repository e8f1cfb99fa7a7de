use {
    crate::domain::notify::{Notifier, SubscriptionNotice},
    async_trait::async_trait,
};

/// Writes notices to the log. Stands in for the email/WhatsApp senders,
/// which live outside this service.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &SubscriptionNotice) -> Result<(), String> {
        tracing::info!(
            kind = ?notice.kind,
            user_id = %notice.user_id,
            email = notice.email.as_deref().unwrap_or(""),
            plan_id = %notice.plan_id,
            expires_at = ?notice.expires_at,
            "subscription notice"
        );
        Ok(())
    }
}
