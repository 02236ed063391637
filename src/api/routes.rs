//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/blocks", get(handlers::get_blocks))
        .route("/transaction/{id}", get(handlers::get_transaction))
        .route("/transaction-pool", get(handlers::get_transaction_pool))
        .route(
            "/unspent-transaction-outputs",
            get(handlers::get_unspent_tx_outs),
        )
        .route(
            "/my-unspent-transaction-outputs",
            get(handlers::get_my_unspent_tx_outs),
        )
        .route("/address", get(handlers::get_own_address))
        .route("/address/{address}", get(handlers::get_address))
        .route("/balance", get(handlers::get_own_balance))
        .route("/balance/{address}", get(handlers::get_balance))
        .route("/mint-block", post(handlers::mint_block))
        .route("/mint-raw-block", post(handlers::mint_raw_block))
        .route("/send-transaction", post(handlers::send_transaction))
        .route("/peers", get(handlers::get_peers))
        .route("/add-peer", post(handlers::add_peer))
        .with_state(state)
        .layer(cors)
}
