//! API route handlers.
//!
//! All endpoints return JSON. Validation failures map to 400-class
//! responses, `AlreadySettled` to 409, storage failures to 500 with a
//! generic message — the cause goes to the operational log, not the
//! client.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::betting::{BettingService, PlaceWagerError};
use crate::ledger;
use crate::settlement::{SettleError, SettlementEngine};
use crate::store;
use crate::types::{Account, LedgerEntry, Market, SettlementSummary, Wager};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub pool: sqlx::SqlitePool,
    pub betting: BettingService,
    pub engine: SettlementEngine,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        error!(error = %e, "Storage error");
        ApiError::Internal
    }
}

impl From<PlaceWagerError> for ApiError {
    fn from(e: PlaceWagerError) -> Self {
        match &e {
            PlaceWagerError::AccountNotFound(_) | PlaceWagerError::MarketNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            PlaceWagerError::Storage(cause) => {
                error!(error = %cause, "Storage error during wager placement");
                ApiError::Internal
            }
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<SettleError> for ApiError {
    fn from(e: SettleError) -> Self {
        match &e {
            SettleError::MarketNotFound(_) => ApiError::NotFound(e.to_string()),
            SettleError::AlreadySettled(_) => ApiError::Conflict(e.to_string()),
            SettleError::Storage(cause) => {
                error!(error = %cause, "Storage error during settlement");
                ApiError::Internal
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub round_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceWagerRequest {
    pub account_id: i64,
    pub market_id: i64,
    pub team: String,
    pub stake: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub home_score: i64,
    pub away_score: i64,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub account: Account,
    /// Whether replaying the ledger reproduces the live bankroll.
    pub ledger_consistent: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/markets?round_id=N — markets for a round, or every
/// unresolved market when no round is given.
pub async fn get_markets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketsQuery>,
) -> Result<Json<Vec<Market>>, ApiError> {
    let mut conn = state.pool.acquire().await?;
    let markets = match query.round_id {
        Some(round_id) => store::list_markets_for_round(&mut conn, round_id).await?,
        None => store::list_unresolved_markets(&mut conn).await?,
    };
    Ok(Json(markets))
}

/// POST /api/wagers
pub async fn post_wager(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaceWagerRequest>,
) -> Result<Json<Wager>, ApiError> {
    let wager = state
        .betting
        .place_wager(
            request.account_id,
            request.market_id,
            &request.team,
            request.stake,
        )
        .await?;
    Ok(Json(wager))
}

/// GET /api/accounts/:id
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
) -> Result<Json<AccountResponse>, ApiError> {
    let mut conn = state.pool.acquire().await?;
    let account = store::get_account(&mut conn, account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Account not found: {account_id}")))?;
    let report = ledger::verify_account(&mut conn, account_id).await?;
    Ok(Json(AccountResponse {
        account,
        ledger_consistent: report.is_consistent(),
    }))
}

/// GET /api/accounts/:id/wagers
pub async fn get_account_wagers(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
) -> Result<Json<Vec<Wager>>, ApiError> {
    let mut conn = state.pool.acquire().await?;
    let wagers = store::wagers_for_account(&mut conn, account_id).await?;
    Ok(Json(wagers))
}

/// GET /api/accounts/:id/ledger
pub async fn get_account_ledger(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let mut conn = state.pool.acquire().await?;
    let history = ledger::history_for(&mut conn, account_id).await?;
    Ok(Json(history))
}

/// POST /api/markets/:id/settle — manual settlement trigger.
pub async fn post_settle(
    State(state): State<Arc<AppState>>,
    Path(market_id): Path<i64>,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettlementSummary>, ApiError> {
    let summary = state
        .engine
        .settle_market(market_id, request.home_score, request.away_score)
        .await?;
    Ok(Json(summary))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
