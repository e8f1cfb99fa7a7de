pub mod admin;
pub mod api_errors;
pub mod webhook;

use {
    crate::AppState,
    axum::{
        Router,
        extract::DefaultBodyLimit,
        middleware,
        routing::{delete, get, post},
    },
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users/{id}/subscription", get(admin::get_subscription))
        .route(
            "/users/{id}/subscription/renew",
            post(admin::renew_subscription),
        )
        .route(
            "/users/{id}/subscription/cancel",
            post(admin::cancel_subscription),
        )
        .route(
            "/users/{id}/games",
            get(admin::list_games).post(admin::select_game),
        )
        .route("/users/{id}/games/{game_id}", delete(admin::remove_game))
        .route("/users/{id}/founder", post(admin::set_founder))
        .route(
            "/services/{id}/slots",
            get(admin::list_slots).post(admin::add_slot),
        )
        .route("/services/{id}/release", post(admin::release_for_user))
        .route("/slots/{id}/unassign", post(admin::unassign_slot))
        .route("/admin/sweep", post(admin::run_sweep))
        .route("/invoices", post(admin::create_invoice))
        .route("/transactions/{id}/reconcile", post(admin::reconcile))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhook", post(webhook::webhook_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
