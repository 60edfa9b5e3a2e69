//! Round lifecycle management.
//!
//! Flips rounds `Upcoming -> Active -> Completed` on schedule and credits
//! each active account the round bonus when a round starts. Bonus
//! application is idempotent per (account, round): an existing
//! `RoundBonus` ledger entry for that round number means the account is
//! skipped, so the job can be re-run safely after a crash.
//!
//! Each account's bonus is its own transaction (bankroll mutation and
//! ledger entry together); one failing account never blocks the rest.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::events::{BankrollEvent, EventSink, BANKROLL_UPDATE};
use crate::ledger;
use crate::store;
use crate::types::{ChangeKind, Round, RoundStatus};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of processing one round start.
#[derive(Debug, Clone)]
pub struct BonusReport {
    pub round_number: i64,
    pub applied: usize,
    pub already_processed: usize,
    pub failed: usize,
}

impl fmt::Display for BonusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} bonus: applied={} already={} failed={}",
            self.round_number, self.applied, self.already_processed, self.failed,
        )
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RoundService {
    pool: SqlitePool,
    sink: Arc<dyn EventSink>,
    bonus_amount: Decimal,
}

impl RoundService {
    pub fn new(pool: SqlitePool, sink: Arc<dyn EventSink>, bonus_amount: Decimal) -> Self {
        Self { pool, sink, bonus_amount }
    }

    /// Credit the round bonus to every active account that hasn't
    /// received it for this round yet.
    pub async fn process_round_start(&self, round: &Round) -> Result<BonusReport, sqlx::Error> {
        info!(round = %round, bonus = %self.bonus_amount, "Processing round start");

        let mut conn = self.pool.acquire().await?;
        let accounts = store::list_active_accounts(&mut conn).await?;
        drop(conn);

        let mut report = BonusReport {
            round_number: round.round_number,
            applied: 0,
            already_processed: 0,
            failed: 0,
        };

        for account in accounts {
            match self.apply_bonus(account.account_id, round.round_number).await {
                Ok(Some(new_balance)) => {
                    report.applied += 1;
                    self.sink.emit(
                        BANKROLL_UPDATE,
                        BankrollEvent {
                            account_id: account.account_id,
                            new_bankroll: new_balance,
                            reason: "round_bonus".to_string(),
                            market_id: None,
                        }
                        .payload(),
                    );
                }
                Ok(None) => report.already_processed += 1,
                Err(e) => {
                    error!(
                        account_id = account.account_id,
                        round_number = round.round_number,
                        error = %e,
                        "Failed to apply round bonus"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(%report, "Round start processed");
        Ok(report)
    }

    /// Apply the bonus to one account. Returns the new balance, or
    /// `None` when the bonus was already applied for this round.
    async fn apply_bonus(
        &self,
        account_id: i64,
        round_number: i64,
    ) -> Result<Option<Decimal>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM ledger
             WHERE account_id = ? AND round_number = ? AND change_kind = 'RoundBonus'",
        )
        .bind(account_id)
        .bind(round_number)
        .fetch_one(&mut *tx)
        .await?;
        let existing: i64 = row.try_get("n")?;
        if existing > 0 {
            return Ok(None);
        }

        let account = store::get_account(&mut tx, account_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        let balance_before = account.bankroll;
        let balance_after = balance_before + self.bonus_amount;

        sqlx::query("UPDATE accounts SET bankroll = ? WHERE account_id = ?")
            .bind(store::encode_decimal(balance_after))
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        ledger::append(
            &mut tx,
            ledger::NewEntry {
                account_id,
                round_number: Some(round_number),
                change_kind: ChangeKind::RoundBonus,
                wager_id: None,
                amount_delta: self.bonus_amount,
                balance_before,
                balance_after,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(Some(balance_after))
    }

    /// Activate rounds whose window has opened (crediting bonuses) and
    /// complete rounds whose window has closed. Returns the activated
    /// rounds.
    ///
    /// Connections are scoped per step so bonus processing never runs
    /// while another connection is checked out.
    pub async fn activate_due_rounds(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Round>> {
        let upcoming = {
            let mut conn = self.pool.acquire().await?;
            store::list_rounds_with_status(&mut conn, RoundStatus::Upcoming).await?
        };

        let mut activated = Vec::new();
        for round in upcoming {
            if round.start_date <= now {
                {
                    let mut conn = self.pool.acquire().await?;
                    store::update_round_status(&mut conn, round.round_id, RoundStatus::Active)
                        .await?;
                }
                info!(round = %round, "Round activated");
                self.process_round_start(&round).await?;
                activated.push(Round { status: RoundStatus::Active, ..round });
            }
        }

        let active = {
            let mut conn = self.pool.acquire().await?;
            store::list_rounds_with_status(&mut conn, RoundStatus::Active).await?
        };
        for round in active {
            if round.end_date < now {
                let mut conn = self.pool.acquire().await?;
                store::update_round_status(&mut conn, round.round_id, RoundStatus::Completed)
                    .await?;
                info!(round = %round, "Round completed");
            }
        }

        Ok(activated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
