//! Bankroll ledger.
//!
//! Read-only aggregate view over the append-only `ledger` table, plus the
//! crate-internal `append` used by the betting service, the settlement
//! engine and the round bonus job from inside their transactions. There
//! is no public mutation API: entries are created once and never updated
//! or deleted.
//!
//! The integrity contract: replaying every entry for an account in
//! insertion order from zero reproduces the live bankroll exactly.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use std::fmt;
use tracing::debug;

use crate::store;
use crate::types::{ChangeKind, LedgerEntry};

// ---------------------------------------------------------------------------
// Append (crate-internal)
// ---------------------------------------------------------------------------

/// A ledger entry about to be written. Ids and timestamps are assigned
/// at insertion.
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub account_id: i64,
    pub round_number: Option<i64>,
    pub change_kind: ChangeKind,
    pub wager_id: Option<i64>,
    pub amount_delta: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Append one entry. Must be called inside the same transaction as the
/// bankroll mutation it records.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    entry: NewEntry,
) -> Result<LedgerEntry, sqlx::Error> {
    debug_assert_eq!(
        entry.balance_before + entry.amount_delta,
        entry.balance_after,
        "ledger entry arithmetic must be consistent"
    );

    let now = Utc::now();
    let entry_id = sqlx::query(
        "INSERT INTO ledger
         (account_id, round_number, change_kind, wager_id,
          amount_delta, balance_before, balance_after, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.account_id)
    .bind(entry.round_number)
    .bind(entry.change_kind.to_string())
    .bind(entry.wager_id)
    .bind(store::encode_decimal(entry.amount_delta))
    .bind(store::encode_decimal(entry.balance_before))
    .bind(store::encode_decimal(entry.balance_after))
    .bind(store::encode_time(now))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(
        entry_id,
        account_id = entry.account_id,
        kind = %entry.change_kind,
        delta = %entry.amount_delta,
        "Ledger entry appended"
    );

    Ok(LedgerEntry {
        entry_id,
        account_id: entry.account_id,
        round_number: entry.round_number,
        change_kind: entry.change_kind,
        wager_id: entry.wager_id,
        amount_delta: entry.amount_delta,
        balance_before: entry.balance_before,
        balance_after: entry.balance_after,
        created_at: now,
    })
}

// ---------------------------------------------------------------------------
// History & replay
// ---------------------------------------------------------------------------

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
    use sqlx::Row;
    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id")?,
        account_id: row.try_get("account_id")?,
        round_number: row.try_get("round_number")?,
        change_kind: row
            .try_get::<String, _>("change_kind")?
            .parse()
            .map_err(store::decode_err)?,
        wager_id: row.try_get("wager_id")?,
        amount_delta: store::decode_decimal(&row.try_get::<String, _>("amount_delta")?)?,
        balance_before: store::decode_decimal(&row.try_get::<String, _>("balance_before")?)?,
        balance_after: store::decode_decimal(&row.try_get::<String, _>("balance_after")?)?,
        created_at: store::decode_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// All ledger entries for an account, oldest first.
pub async fn history_for(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    sqlx::query("SELECT * FROM ledger WHERE account_id = ? ORDER BY entry_id")
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(entry_from_row)
        .collect()
}

/// Fold amount deltas from zero. With a complete history (starting at
/// the `InitialDeposit` entry) this equals the live bankroll.
pub fn replay(entries: &[LedgerEntry]) -> Decimal {
    entries.iter().map(|e| e.amount_delta).sum()
}

// ---------------------------------------------------------------------------
// Integrity check
// ---------------------------------------------------------------------------

/// Outcome of replaying an account's history against its live balance.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub account_id: i64,
    pub entry_count: usize,
    pub replayed_balance: Decimal,
    pub live_bankroll: Decimal,
    /// Entries whose own before/delta/after arithmetic is broken.
    pub inconsistent_entries: usize,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.replayed_balance == self.live_bankroll && self.inconsistent_entries == 0
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acct:{} entries={} replayed=${:.2} live=${:.2} ({})",
            self.account_id,
            self.entry_count,
            self.replayed_balance,
            self.live_bankroll,
            if self.is_consistent() { "OK" } else { "MISMATCH" },
        )
    }
}

/// Replay an account's full history and compare against its bankroll.
pub async fn verify_account(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<IntegrityReport, sqlx::Error> {
    let account = store::get_account(&mut *conn, account_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    let entries = history_for(&mut *conn, account_id).await?;
    let inconsistent = entries.iter().filter(|e| !e.is_consistent()).count();

    Ok(IntegrityReport {
        account_id,
        entry_count: entries.len(),
        replayed_balance: replay(&entries),
        live_bankroll: account.bankroll,
        inconsistent_entries: inconsistent,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
