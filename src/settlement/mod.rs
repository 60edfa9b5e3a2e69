//! Settlement engine.
//!
//! Resolves every pending wager for a completed market into bankroll
//! credits and ledger entries, exactly once. The whole batch — every
//! wager transition, every ledger append, and the market's move to
//! `Completed` — commits in a single transaction; on any storage error
//! the entire settlement rolls back and the caller may retry safely
//! thanks to the terminal-state guard.
//!
//! One documented exception to batch atomicity: a wager whose account
//! row has vanished is skipped with a warning rather than aborting the
//! payout for every other bettor on the market.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{BankrollEvent, EventSink, BANKROLL_UPDATE};
use crate::ledger;
use crate::store;
use crate::types::{ChangeKind, MarketStatus, MatchResult, SettlementSummary, WagerStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("Market not found: {0}")]
    MarketNotFound(i64),

    /// Safe no-op conflict: the market was already settled. Callers may
    /// log and ignore.
    #[error("Market {0} has already been settled")]
    AlreadySettled(i64),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SettlementEngine {
    pool: SqlitePool,
    sink: Arc<dyn EventSink>,
}

impl SettlementEngine {
    pub fn new(pool: SqlitePool, sink: Arc<dyn EventSink>) -> Self {
        Self { pool, sink }
    }

    /// Settle a market with its final score.
    ///
    /// Outcome rules per pending wager:
    /// - draw: Void, full stake refunded
    /// - selected team won: Won, full `potential_payout` credited
    /// - otherwise: Lost, no credit (the stake left at placement)
    ///
    /// Notifications go out only after the commit succeeds; sink
    /// behaviour never affects the settlement itself.
    pub async fn settle_market(
        &self,
        market_id: i64,
        home_score: i64,
        away_score: i64,
    ) -> Result<SettlementSummary, SettleError> {
        let mut tx = self.pool.begin().await?;

        let market = store::get_market(&mut tx, market_id)
            .await?
            .ok_or(SettleError::MarketNotFound(market_id))?;
        if market.status == MarketStatus::Completed {
            return Err(SettleError::AlreadySettled(market_id));
        }

        let result = market.apply_result(home_score, away_score);
        let winner = market.winner_name(result);
        let pending = store::pending_wagers_for_market(&mut tx, market_id).await?;
        let round_number = store::get_round(&mut tx, market.round_id)
            .await?
            .map(|r| r.round_number);
        let now = Utc::now();

        info!(
            market_id,
            home_score,
            away_score,
            winner = %winner,
            pending = pending.len(),
            "Settling market"
        );

        let mut summary = SettlementSummary {
            market_id,
            winner: winner.clone(),
            home_score,
            away_score,
            wagers_won: 0,
            wagers_lost: 0,
            wagers_voided: 0,
            wagers_skipped: 0,
            total_paid_out: Decimal::ZERO,
            settled_at: now,
        };
        let mut notifications: Vec<BankrollEvent> = Vec::with_capacity(pending.len());

        for wager in &pending {
            // Data-integrity anomaly, not a normal-path condition: skip
            // the wager instead of failing the whole batch.
            let Some(account) = store::get_account(&mut tx, wager.account_id).await? else {
                warn!(
                    wager_id = wager.wager_id,
                    account_id = wager.account_id,
                    "Account missing for wager; skipping settlement of this wager"
                );
                summary.wagers_skipped += 1;
                continue;
            };

            let (new_status, amount_delta, change_kind, reason) = if result == MatchResult::Draw {
                (WagerStatus::Void, wager.stake, ChangeKind::WagerVoid, "wager_void")
            } else if wager.team_selected == winner {
                (
                    WagerStatus::Won,
                    wager.potential_payout,
                    ChangeKind::WagerWin,
                    "wager_win",
                )
            } else {
                (WagerStatus::Lost, Decimal::ZERO, ChangeKind::WagerLoss, "wager_loss")
            };

            let balance_before = account.bankroll;
            let balance_after = balance_before + amount_delta;

            sqlx::query("UPDATE accounts SET bankroll = ? WHERE account_id = ?")
                .bind(store::encode_decimal(balance_after))
                .bind(wager.account_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("UPDATE wagers SET status = ?, settled_at = ? WHERE wager_id = ?")
                .bind(new_status.to_string())
                .bind(store::encode_time(now))
                .bind(wager.wager_id)
                .execute(&mut *tx)
                .await?;

            ledger::append(
                &mut tx,
                ledger::NewEntry {
                    account_id: wager.account_id,
                    round_number,
                    change_kind,
                    wager_id: Some(wager.wager_id),
                    amount_delta,
                    balance_before,
                    balance_after,
                },
            )
            .await?;

            match new_status {
                WagerStatus::Won => summary.wagers_won += 1,
                WagerStatus::Lost => summary.wagers_lost += 1,
                WagerStatus::Void => summary.wagers_voided += 1,
                WagerStatus::Pending => unreachable!("settlement never leaves a wager pending"),
            }
            summary.total_paid_out += amount_delta;

            notifications.push(BankrollEvent {
                account_id: wager.account_id,
                new_bankroll: balance_after,
                reason: reason.to_string(),
                market_id: Some(market_id),
            });
        }

        sqlx::query(
            "UPDATE markets
             SET result_home_score = ?, result_away_score = ?, winner = ?, status = 'Completed'
             WHERE market_id = ?",
        )
        .bind(home_score)
        .bind(away_score)
        .bind(&winner)
        .bind(market_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        for event in &notifications {
            self.sink.emit(BANKROLL_UPDATE, event.payload());
        }

        info!(%summary, "Market settled");
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
