use {
    crate::domain::error::PipelineError,
    crate::domain::id::SlotId,
    crate::domain::ledger::Ledger,
    crate::domain::notify::NoticeKind,
    crate::services::entitlements::EntitlementManager,
    chrono::{DateTime, TimeDelta, Utc},
    serde::Serialize,
    std::sync::Arc,
    std::time::Duration,
    tokio::sync::watch,
    uuid::Uuid,
};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub released_slots: Vec<SlotId>,
    pub expired_subscriptions: Vec<Uuid>,
    pub expiry_notices: usize,
}

/// Time-based cleanup: stale slot assignments, lapsed subscriptions, and
/// upcoming-expiry notices.
pub struct ExpirySweeper {
    ledger: Arc<dyn Ledger>,
    entitlements: Arc<EntitlementManager>,
    slot_window: TimeDelta,
    notice_window: TimeDelta,
}

impl ExpirySweeper {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        entitlements: Arc<EntitlementManager>,
        slot_window_days: u32,
        expiry_notice_days: u32,
    ) -> Self {
        Self {
            ledger,
            entitlements,
            slot_window: TimeDelta::days(i64::from(slot_window_days)),
            notice_window: TimeDelta::days(i64::from(expiry_notice_days)),
        }
    }

    /// Idempotent: a second run at the same `now` changes nothing.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let cutoff = now - self.slot_window;
        let released = self.ledger.release_slots_assigned_before(cutoff).await?;
        for slot in &released {
            tracing::info!(
                slot_id = %slot.id,
                service_id = %slot.service_id,
                previous_user = ?slot.assigned_to,
                assigned_at = ?slot.assigned_at,
                "stale slot released"
            );
        }

        let expired = self.ledger.expire_lapsed_subscriptions(now).await?;
        for sub in &expired {
            tracing::info!(
                subscription_id = %sub.id,
                user_id = %sub.user_id,
                "subscription expired"
            );
        }

        let expiring = self
            .ledger
            .flag_expiring_subscriptions(now, now + self.notice_window)
            .await?;
        for sub in &expiring {
            self.entitlements.send_notice(NoticeKind::Expiring, sub);
        }

        let report = SweepReport {
            released_slots: released.iter().map(|s| s.id).collect(),
            expired_subscriptions: expired.iter().map(|s| s.id).collect(),
            expiry_notices: expiring.len(),
        };
        tracing::info!(
            released = report.released_slots.len(),
            expired = report.expired_subscriptions.len(),
            notices = report.expiry_notices,
            "sweep finished"
        );
        Ok(report)
    }
}

/// Run `sweep` every `interval` until shutdown is signalled.
pub async fn run_sweeper(
    sweeper: Arc<ExpirySweeper>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("expiry sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = sweeper.sweep(Utc::now()).await {
            tracing::error!(error = %e, "sweep failed");
        }
    }
}
