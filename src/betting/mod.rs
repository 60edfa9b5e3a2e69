//! Betting service.
//!
//! Validates and executes wager placement against a market and an
//! account's bankroll. The happy path is a single transaction: debit the
//! bankroll, insert the wager with odds snapshotted from the market, and
//! append the placement ledger entry. A failed precondition returns the
//! typed error with no side effects at all.
//!
//! `place_wager` is NOT idempotent: a retried call creates a second
//! wager. A caller that timed out must read back state instead of
//! re-applying blindly; request-level dedupe belongs to a higher layer.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::info;

use crate::ledger;
use crate::store;
use crate::types::{ChangeKind, MarketStatus, Wager, WagerStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a wager could not be placed. Validation kinds map to 400-class
/// responses at the API layer; `Storage` is an infrastructure failure
/// with full rollback.
#[derive(Debug, thiserror::Error)]
pub enum PlaceWagerError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Market not found: {0}")]
    MarketNotFound(i64),

    #[error("Betting closed for this market (status: {status})")]
    MarketClosed { status: MarketStatus },

    #[error("Invalid team selected: {0}")]
    InvalidOutcome(String),

    #[error("Odds not available for the selected team")]
    OddsUnavailable,

    #[error("Stake must be positive with at most two decimal places")]
    InvalidStake,

    #[error("Insufficient funds: stake ${stake:.2}, balance ${balance:.2}")]
    InsufficientFunds { stake: Decimal, balance: Decimal },

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl PlaceWagerError {
    /// Whether this is a caller error rather than an infrastructure one.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PlaceWagerError::Storage(_))
    }
}

/// Stake rule: strictly positive, at most two fractional digits.
pub fn is_valid_stake(stake: Decimal) -> bool {
    stake > Decimal::ZERO && stake.normalize().scale() <= 2
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BettingService {
    pool: SqlitePool,
}

impl BettingService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Place a wager for an account on one team of a market.
    ///
    /// Preconditions are checked in order, first failure wins: market
    /// open, team valid, odds present, stake valid, funds sufficient.
    /// On success the debit, the wager row and the ledger entry commit
    /// together or not at all.
    pub async fn place_wager(
        &self,
        account_id: i64,
        market_id: i64,
        team_selected: &str,
        stake: Decimal,
    ) -> Result<Wager, PlaceWagerError> {
        let mut tx = self.pool.begin().await?;

        let market = store::get_market(&mut tx, market_id)
            .await?
            .ok_or(PlaceWagerError::MarketNotFound(market_id))?;
        let account = store::get_account(&mut tx, account_id)
            .await?
            .ok_or(PlaceWagerError::AccountNotFound(account_id))?;

        let now = Utc::now();
        if !market.is_open_for_wagers(now) {
            return Err(PlaceWagerError::MarketClosed { status: market.status });
        }
        if team_selected != market.home_team && team_selected != market.away_team {
            return Err(PlaceWagerError::InvalidOutcome(team_selected.to_string()));
        }
        let odds = market
            .odds_for(team_selected)
            .ok_or(PlaceWagerError::OddsUnavailable)?;
        if !is_valid_stake(stake) {
            return Err(PlaceWagerError::InvalidStake);
        }
        if account.bankroll < stake {
            return Err(PlaceWagerError::InsufficientFunds {
                stake,
                balance: account.bankroll,
            });
        }

        let potential_payout = Wager::compute_payout(stake, odds);
        let balance_before = account.bankroll;
        let balance_after = balance_before - stake;

        sqlx::query("UPDATE accounts SET bankroll = ? WHERE account_id = ?")
            .bind(store::encode_decimal(balance_after))
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        let wager_id = sqlx::query(
            "INSERT INTO wagers
             (account_id, market_id, round_id, team_selected, stake,
              odds_at_placement, potential_payout, status, placed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'Pending', ?)",
        )
        .bind(account_id)
        .bind(market_id)
        .bind(market.round_id)
        .bind(team_selected)
        .bind(store::encode_decimal(stake))
        .bind(store::encode_decimal(odds))
        .bind(store::encode_decimal(potential_payout))
        .bind(store::encode_time(now))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let round_number = store::get_round(&mut tx, market.round_id)
            .await?
            .map(|r| r.round_number);

        ledger::append(
            &mut tx,
            ledger::NewEntry {
                account_id,
                round_number,
                change_kind: ChangeKind::WagerPlacement,
                wager_id: Some(wager_id),
                amount_delta: -stake,
                balance_before,
                balance_after,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            wager_id,
            account_id,
            market_id,
            team = team_selected,
            stake = %stake,
            odds = %odds,
            payout = %potential_payout,
            "Wager placed"
        );

        Ok(Wager {
            wager_id,
            account_id,
            market_id,
            round_id: market.round_id,
            team_selected: team_selected.to_string(),
            stake,
            odds_at_placement: odds,
            potential_payout,
            status: WagerStatus::Pending,
            placed_at: now,
            settled_at: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
