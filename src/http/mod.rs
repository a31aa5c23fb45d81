//! C14: HTTP surface. One module per resource, assembled into a single `Router`
//! here — grounded on `packages/canceler/src/server.rs`'s `Router::new().route(...)
//! .with_state(state)` / `axum::serve` idiom, not the sibling operator's hand-rolled
//! raw-TCP handler (see DESIGN.md "Deliberate deviations").

pub mod accounts;
pub mod cashouts;
pub mod challenges;
pub mod conversion_info;
pub mod health;
pub mod monitor;
pub mod taler_integration;
pub mod taler_wire_gateway;
pub mod transactions;
pub mod withdrawals;

use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::conversion::ConversionConfig;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub conversion: Option<ConversionConfig>,
}

/// Assembles the full router.
pub fn router(state: AppState) -> Router {
    let sensitive = Router::new()
        .route(
            "/accounts/{login}/challenge/{id}",
            axum::routing::post(challenges::send),
        )
        .route(
            "/accounts/{login}/challenge/{id}/confirm",
            axum::routing::post(challenges::confirm),
        )
        .route(
            "/accounts/{login}/token",
            axum::routing::post(accounts::create_token),
        );

    let general = Router::new()
        .route("/accounts", axum::routing::post(accounts::register))
        .route(
            "/accounts/{login}",
            axum::routing::get(accounts::get)
                .patch(accounts::patch)
                .delete(accounts::delete),
        )
        .route(
            "/accounts/{login}/token",
            axum::routing::delete(accounts::delete_token),
        )
        .route(
            "/accounts/{login}/transactions",
            axum::routing::get(transactions::history).post(transactions::create),
        )
        .route(
            "/accounts/{login}/withdrawals",
            axum::routing::post(withdrawals::create),
        )
        .route(
            "/withdrawals/{uuid}",
            axum::routing::get(withdrawals::get),
        )
        .route(
            "/withdrawals/{uuid}/abort",
            axum::routing::post(withdrawals::abort),
        )
        .route(
            "/withdrawals/{uuid}/confirm",
            axum::routing::post(withdrawals::confirm),
        )
        .route(
            "/taler-integration/withdrawal-operation/{uuid}",
            axum::routing::get(taler_integration::get).post(taler_integration::set_details),
        )
        .route(
            "/taler-integration/withdrawal-operation/{uuid}/abort",
            axum::routing::post(taler_integration::abort),
        )
        .route(
            "/accounts/{login}/taler-wire-gateway/transfer",
            axum::routing::post(taler_wire_gateway::transfer),
        )
        .route(
            "/accounts/{login}/taler-wire-gateway/admin/add-incoming",
            axum::routing::post(taler_wire_gateway::add_incoming),
        )
        .route(
            "/accounts/{login}/taler-wire-gateway/history/incoming",
            axum::routing::get(taler_wire_gateway::history_incoming),
        )
        .route(
            "/accounts/{login}/taler-wire-gateway/history/outgoing",
            axum::routing::get(taler_wire_gateway::history_outgoing),
        )
        .route(
            "/accounts/{login}/cashouts",
            axum::routing::post(cashouts::create).get(cashouts::list),
        )
        .route(
            "/accounts/{login}/cashouts/{id}",
            axum::routing::get(cashouts::get),
        )
        .route(
            "/accounts/{login}/cashouts/{id}/confirm",
            axum::routing::post(cashouts::confirm),
        )
        .route(
            "/accounts/{login}/cashouts/{id}/abort",
            axum::routing::post(cashouts::abort),
        )
        .route(
            "/conversion-info/config",
            axum::routing::get(conversion_info::config),
        )
        .route(
            "/conversion-info/cashin-rate",
            axum::routing::get(conversion_info::cashin_rate),
        )
        .route(
            "/conversion-info/cashout-rate",
            axum::routing::get(conversion_info::cashout_rate),
        )
        .route("/monitor", axum::routing::get(monitor::monitor))
        .route("/health", axum::routing::get(health::health))
        .route("/healthz", axum::routing::get(health::liveness))
        .route("/readyz", axum::routing::get(health::readiness))
        .route("/metrics", axum::routing::get(health::metrics));

    general
        .merge(sensitive)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
