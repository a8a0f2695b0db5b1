//! Dashboard: Axum web server exposing the live board.
//!
//! Serves a JSON API for the board, the raw bet feed, and the write
//! operations (login, place bet, rename, PIN change, admin reset /
//! open-close / PIN reset).
//! CORS enabled for the separate front-end.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use routes::{AppState, ADMIN_TOKEN_HEADER};

/// Start the dashboard web server.
///
/// Binds first so a taken port fails startup, then serves on a background
/// task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ADMIN_TOKEN_HEADER)]);

    Router::new()
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/api/board", get(routes::get_board))
        .route("/api/ticker", get(routes::get_ticker))
        .route(
            "/api/bets",
            get(routes::get_bets)
                .post(routes::post_bet)
                .delete(routes::reset_bets),
        )
        .route("/api/status", get(routes::get_status).put(routes::put_status))
        .route("/api/login", post(routes::login))
        .route("/api/participants/:id", patch(routes::patch_participant))
        .route("/api/participants/:id/pin", put(routes::put_pin))
        .route("/api/pins/reset", post(routes::reset_pins))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
