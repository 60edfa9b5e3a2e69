//! HTTP API — Axum server for user-facing actions and monitoring.
//!
//! Exposes wager placement, account history, markets, and a manual
//! settlement trigger. CORS enabled for local frontend development.

pub mod routes;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Start the API server in the background — this doesn't block.
pub fn spawn_api(state: Arc<AppState>, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind API port");

        axum::serve(listener, app).await.expect("API server error");
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/markets", get(routes::get_markets))
        .route("/api/wagers", post(routes::post_wager))
        .route("/api/accounts/:id", get(routes::get_account))
        .route("/api/accounts/:id/wagers", get(routes::get_account_wagers))
        .route("/api/accounts/:id/ledger", get(routes::get_account_ledger))
        .route("/api/markets/:id/settle", post(routes::post_settle))
        .layer(cors)
        .with_state(state)
}
