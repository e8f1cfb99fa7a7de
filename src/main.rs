use {
    slot_ledger::{
        AppState,
        domain::ledger::Ledger,
        infra::{config::Config, memory::MemoryLedger, notifier::LogNotifier, postgres::PgLedger},
        services::sweeper::run_sweeper,
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("invalid configuration");
    let catalog = config.load_catalog().expect("failed to load catalog");
    tracing::info!(
        plans = catalog.plans.len(),
        services = catalog.services.len(),
        path = %config.catalog_path.display(),
        "catalog loaded"
    );

    let ledger: Arc<dyn Ledger> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(Duration::from_secs(3))
                .connect(url)
                .await
                .expect("failed to connect to database");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");
            Arc::new(PgLedger::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-process ledger, nothing is persisted");
            Arc::new(MemoryLedger::new())
        }
    };

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set; webhook signatures are not verified");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; admin routes are unauthenticated");
    }

    let state = AppState::new(ledger, catalog, Arc::new(LogNotifier), &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(run_sweeper(
        Arc::clone(&state.sweeper),
        config.sweep_interval,
        shutdown_rx,
    ));

    let app = slot_ledger::adapters::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "sweeper task panicked");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
