pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

use {
    domain::{catalog::Catalog, ledger::Ledger, notify::Notifier},
    infra::config::Config,
    services::{
        allocator::SlotAllocator, entitlements::EntitlementManager, sweeper::ExpirySweeper,
        webhook_processor::WebhookProcessor,
    },
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub catalog: Arc<Catalog>,
    pub processor: Arc<WebhookProcessor>,
    pub entitlements: Arc<EntitlementManager>,
    pub allocator: Arc<SlotAllocator>,
    pub sweeper: Arc<ExpirySweeper>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        catalog: Catalog,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let entitlements = Arc::new(EntitlementManager::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            notifier,
            config.max_slots_per_user,
        ));
        let allocator = Arc::new(SlotAllocator::new(Arc::clone(&ledger), Arc::clone(&catalog)));
        let processor = Arc::new(WebhookProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            Arc::clone(&entitlements),
            Arc::clone(&allocator),
            config.webhook_secret.clone(),
            config.hold_fallback_matches,
            config.reconcile_grace,
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::clone(&ledger),
            Arc::clone(&entitlements),
            config.slot_window_days,
            config.expiry_notice_days,
        ));

        Self {
            ledger,
            catalog,
            processor,
            entitlements,
            allocator,
            sweeper,
            admin_token: config.admin_token.as_deref().map(Arc::from),
        }
    }
}
