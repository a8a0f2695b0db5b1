//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Every write goes through the store and is followed by a full board
//! rebuild.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::engine::ticker::TickerItem;
use crate::engine::{Board, BoardOptions};
use crate::store::{self, BetStore};
use crate::types::{Amount, BetRecord, LeaderboardEntry, PaddockError, SystemStatus};

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: Arc<dyn BetStore>,
    pub options: BoardOptions,
    pub board: RwLock<Board>,
    admin_token: Option<SecretString>,
    /// Held from snapshot fetch to board swap so an older snapshot can
    /// never overwrite a newer one.
    refresh_lock: Mutex<()>,
}

impl DashboardState {
    pub fn new(
        store: Arc<dyn BetStore>,
        options: BoardOptions,
        admin_token: Option<SecretString>,
    ) -> Self {
        Self {
            store,
            options,
            board: RwLock::new(Board::empty()),
            admin_token,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Rebuild the board from a fresh snapshot. Returns whether the
    /// standings changed. On failure the previous board stays in place.
    pub async fn refresh(&self) -> Result<bool> {
        let _serial = self.refresh_lock.lock().await;
        let next = Board::refresh(self.store.as_ref(), &self.options).await?;
        let mut board = self.board.write().await;
        let changed = next.standings_differ(&board);
        *board = next;
        Ok(changed)
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<(), PaddockError> {
        let expected = self
            .admin_token
            .as_ref()
            .ok_or_else(|| PaddockError::Forbidden("admin routes are disabled".into()))?;
        let given = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given.is_empty() || given != expected.expose_secret().as_str() {
            return Err(PaddockError::Forbidden("invalid admin token".into()));
        }
        Ok(())
    }

    async fn refresh_after_write(&self, what: &str) {
        if let Err(e) = self.refresh().await {
            error!(error = %e, write = what, "Board refresh after write failed");
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub participant_id: String,
    pub pin: String,
    pub race_id: String,
    #[serde(default)]
    pub investment: Amount,
    #[serde(default)]
    pub return_amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub participant_id: String,
    pub pin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub participant_id: String,
    pub must_change_pin: bool,
}

#[derive(Debug, Deserialize)]
pub struct PinChangeRequest {
    pub pin: String,
    pub new_pin: String,
    /// Optional rename applied together with the PIN change.
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinResetResponse {
    pub reset: usize,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub pin: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error wrapper mapping domain failures to HTTP status codes.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<PaddockError>() {
            Some(PaddockError::BettingClosed) => StatusCode::LOCKED,
            Some(PaddockError::UnknownParticipant(_)) => StatusCode::NOT_FOUND,
            Some(PaddockError::InvalidPin(_)) => StatusCode::UNAUTHORIZED,
            Some(PaddockError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Some(PaddockError::PinChangeRequired(_)) => StatusCode::PRECONDITION_REQUIRED,
            Some(PaddockError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Some(PaddockError::Store { .. }) => StatusCode::BAD_GATEWAY,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, status = %status, "Request rejected");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/leaderboard
pub async fn get_leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.board.read().await.entries.clone())
}

/// GET /api/board
pub async fn get_board(State(state): State<AppState>) -> Json<Board> {
    Json(state.board.read().await.clone())
}

/// GET /api/ticker
pub async fn get_ticker(State(state): State<AppState>) -> Json<Vec<TickerItem>> {
    Json(state.board.read().await.ticker.clone())
}

/// GET /api/bets
pub async fn get_bets(State(state): State<AppState>) -> Result<Json<Vec<BetRecord>>, ApiError> {
    Ok(Json(state.store.fetch_bets().await?))
}

/// POST /api/bets
pub async fn post_bet(
    State(state): State<AppState>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<BetRecord>), ApiError> {
    let pin = SecretString::new(req.pin);
    let session = state.store.verify_pin(&req.participant_id, &pin).await?;

    let record = store::place_bet(
        state.store.as_ref(),
        &session,
        &req.race_id,
        req.investment,
        req.return_amount,
    )
    .await?;

    state.refresh_after_write("append").await;
    Ok((StatusCode::CREATED, Json(record)))
}

/// DELETE /api/bets (admin)
pub async fn reset_bets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.require_admin(&headers)?;
    state.store.reset_bets().await?;
    info!("Bets reset by admin");
    state.refresh_after_write("reset").await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, ApiError> {
    Ok(Json(state.store.fetch_status().await?))
}

/// PUT /api/status (admin)
pub async fn put_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SystemStatus>,
) -> Result<Json<SystemStatus>, ApiError> {
    state.require_admin(&headers)?;
    state.store.set_betting_closed(req.betting_closed).await?;
    info!(betting_closed = req.betting_closed, "Betting status changed");
    state.refresh_after_write("status").await;
    Ok(Json(req))
}

/// PATCH /api/participants/:id
pub async fn patch_participant(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(PaddockError::InvalidInput("display_name must not be empty".into()).into());
    }

    let pin = SecretString::new(req.pin);
    let session = state.store.verify_pin(&participant_id, &pin).await?;
    state.store.rename_participant(&session, display_name).await?;
    info!(participant = %participant_id, display_name, "Participant renamed");

    state.refresh_after_write("rename").await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let pin = SecretString::new(req.pin);
    let session = state.store.verify_pin(&req.participant_id, &pin).await?;
    Ok(Json(LoginResponse {
        participant_id: session.participant_id,
        must_change_pin: session.must_change_pin,
    }))
}

/// PUT /api/participants/:id/pin
pub async fn put_pin(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(req): Json<PinChangeRequest>,
) -> Result<StatusCode, ApiError> {
    let pin = SecretString::new(req.pin);
    let session = state.store.verify_pin(&participant_id, &pin).await?;

    let new_pin = SecretString::new(req.new_pin);
    store::update_credentials(
        state.store.as_ref(),
        &session,
        &new_pin,
        req.display_name.as_deref(),
    )
    .await?;

    if req.display_name.is_some() {
        state.refresh_after_write("rename").await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/pins/reset (admin)
pub async fn reset_pins(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PinResetResponse>, ApiError> {
    state.require_admin(&headers)?;
    let reset = state.store.reset_pins().await?;
    info!(reset, "PINs reset by admin");
    Ok(Json(PinResetResponse { reset }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
