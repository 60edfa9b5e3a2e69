//! Persistence layer.
//!
//! SQLite via sqlx. All money-affecting operations run inside sqlx
//! transactions; SQLite's single-writer transaction model is what
//! serialises concurrent bankroll mutations, so no application-level
//! locking exists anywhere in the crate.
//!
//! Decimals and timestamps are stored as TEXT (canonical decimal strings
//! and RFC 3339) and decoded through the codec helpers here. Query
//! helpers take `&mut SqliteConnection` so the same function works from
//! a pool connection or from inside a transaction (`&mut *tx`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::info;

use crate::ledger;
use crate::types::{Account, ChangeKind, Market, MarketStatus, Round, RoundStatus, Wager};

/// Idempotent schema bootstrap.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE,
    bankroll    TEXT NOT NULL,
    is_bot      INTEGER NOT NULL DEFAULT 0,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rounds (
    round_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    round_number INTEGER NOT NULL,
    year         INTEGER NOT NULL,
    start_date   TEXT NOT NULL,
    end_date     TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'Upcoming',
    UNIQUE (round_number, year)
);

CREATE TABLE IF NOT EXISTS markets (
    market_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    external_ref      TEXT UNIQUE,
    round_id          INTEGER NOT NULL REFERENCES rounds(round_id),
    home_team         TEXT NOT NULL,
    away_team         TEXT NOT NULL,
    start_time        TEXT NOT NULL,
    home_odds         TEXT,
    away_odds         TEXT,
    status            TEXT NOT NULL DEFAULT 'Scheduled',
    result_home_score INTEGER,
    result_away_score INTEGER,
    winner            TEXT,
    last_odds_update  TEXT
);

CREATE TABLE IF NOT EXISTS wagers (
    wager_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id        INTEGER NOT NULL REFERENCES accounts(account_id),
    market_id         INTEGER NOT NULL REFERENCES markets(market_id),
    round_id          INTEGER NOT NULL REFERENCES rounds(round_id),
    team_selected     TEXT NOT NULL,
    stake             TEXT NOT NULL,
    odds_at_placement TEXT NOT NULL,
    potential_payout  TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'Pending',
    placed_at         TEXT NOT NULL,
    settled_at        TEXT
);

CREATE TABLE IF NOT EXISTS ledger (
    entry_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id     INTEGER NOT NULL REFERENCES accounts(account_id),
    round_number   INTEGER,
    change_kind    TEXT NOT NULL,
    wager_id       INTEGER REFERENCES wagers(wager_id),
    amount_delta   TEXT NOT NULL,
    balance_before TEXT NOT NULL,
    balance_after  TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS predictions (
    prediction_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id           INTEGER NOT NULL REFERENCES accounts(account_id),
    market_id            INTEGER NOT NULL REFERENCES markets(market_id),
    predicted_winner     TEXT NOT NULL,
    home_win_probability TEXT NOT NULL,
    away_win_probability TEXT NOT NULL,
    model_confidence     TEXT NOT NULL,
    recommended_team     TEXT,
    stake_fraction       TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    UNIQUE (account_id, market_id)
);

CREATE INDEX IF NOT EXISTS idx_markets_round  ON markets(round_id);
CREATE INDEX IF NOT EXISTS idx_markets_status ON markets(status);
CREATE INDEX IF NOT EXISTS idx_wagers_market  ON wagers(market_id, status);
CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers(account_id);
CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger(account_id);
"#;

// ---------------------------------------------------------------------------
// Pool management
// ---------------------------------------------------------------------------

/// Open (creating if missing) the SQLite database at the given URL.
pub async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {database_url}"))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {database_url}"))?;

    info!(database_url, "Database opened");
    Ok(pool)
}

/// An in-memory pool for tests and ephemeral runs.
///
/// Capped at one connection — each SQLite `:memory:` connection is its
/// own database, so a larger pool would split the data.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory database")?;
    Ok(pool)
}

/// Create all tables and indices if they don't exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .context("Failed to initialise schema")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

pub(crate) fn decode_err(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

pub(crate) fn decode_decimal(raw: &str) -> Result<Decimal, sqlx::Error> {
    raw.parse::<Decimal>().map_err(decode_err)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(decode_err)
}

pub(crate) fn encode_decimal(value: Decimal) -> String {
    value.to_string()
}

pub(crate) fn encode_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn opt_decimal(raw: Option<String>) -> Result<Option<Decimal>, sqlx::Error> {
    raw.as_deref().map(decode_decimal).transpose()
}

fn opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    raw.as_deref().map(decode_time).transpose()
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

pub(crate) fn account_from_row(row: &SqliteRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        account_id: row.try_get("account_id")?,
        username: row.try_get("username")?,
        bankroll: decode_decimal(&row.try_get::<String, _>("bankroll")?)?,
        is_bot: row.try_get("is_bot")?,
        active: row.try_get("active")?,
        created_at: decode_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

pub(crate) fn round_from_row(row: &SqliteRow) -> Result<Round, sqlx::Error> {
    Ok(Round {
        round_id: row.try_get("round_id")?,
        round_number: row.try_get("round_number")?,
        year: row.try_get("year")?,
        start_date: decode_time(&row.try_get::<String, _>("start_date")?)?,
        end_date: decode_time(&row.try_get::<String, _>("end_date")?)?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<RoundStatus>()
            .map_err(decode_err)?,
    })
}

pub(crate) fn market_from_row(row: &SqliteRow) -> Result<Market, sqlx::Error> {
    Ok(Market {
        market_id: row.try_get("market_id")?,
        external_ref: row.try_get("external_ref")?,
        round_id: row.try_get("round_id")?,
        home_team: row.try_get("home_team")?,
        away_team: row.try_get("away_team")?,
        start_time: decode_time(&row.try_get::<String, _>("start_time")?)?,
        home_odds: opt_decimal(row.try_get("home_odds")?)?,
        away_odds: opt_decimal(row.try_get("away_odds")?)?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<MarketStatus>()
            .map_err(decode_err)?,
        result_home_score: row.try_get("result_home_score")?,
        result_away_score: row.try_get("result_away_score")?,
        winner: row.try_get("winner")?,
        last_odds_update: opt_time(row.try_get("last_odds_update")?)?,
    })
}

pub(crate) fn wager_from_row(row: &SqliteRow) -> Result<Wager, sqlx::Error> {
    Ok(Wager {
        wager_id: row.try_get("wager_id")?,
        account_id: row.try_get("account_id")?,
        market_id: row.try_get("market_id")?,
        round_id: row.try_get("round_id")?,
        team_selected: row.try_get("team_selected")?,
        stake: decode_decimal(&row.try_get::<String, _>("stake")?)?,
        odds_at_placement: decode_decimal(&row.try_get::<String, _>("odds_at_placement")?)?,
        potential_payout: decode_decimal(&row.try_get::<String, _>("potential_payout")?)?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(decode_err)?,
        placed_at: decode_time(&row.try_get::<String, _>("placed_at")?)?,
        settled_at: opt_time(row.try_get("settled_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub async fn get_account(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query("SELECT * FROM accounts WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| account_from_row(&row))
        .transpose()
}

pub async fn get_account_by_username(
    conn: &mut SqliteConnection,
    username: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query("SELECT * FROM accounts WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| account_from_row(&row))
        .transpose()
}

pub async fn list_active_accounts(
    conn: &mut SqliteConnection,
) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query("SELECT * FROM accounts WHERE active = 1 ORDER BY account_id")
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(account_from_row)
        .collect()
}

/// Create an account and seed its ledger with the initial deposit, in
/// one transaction. The replay invariant holds from the very first row.
pub async fn create_account(
    pool: &SqlitePool,
    username: &str,
    initial_bankroll: Decimal,
    is_bot: bool,
) -> Result<Account, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let account_id = sqlx::query(
        "INSERT INTO accounts (username, bankroll, is_bot, active, created_at)
         VALUES (?, ?, ?, 1, ?)",
    )
    .bind(username)
    .bind(encode_decimal(initial_bankroll))
    .bind(is_bot)
    .bind(encode_time(now))
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    ledger::append(
        &mut tx,
        ledger::NewEntry {
            account_id,
            round_number: None,
            change_kind: ChangeKind::InitialDeposit,
            wager_id: None,
            amount_delta: initial_bankroll,
            balance_before: Decimal::ZERO,
            balance_after: initial_bankroll,
        },
    )
    .await?;

    tx.commit().await?;
    info!(username, %initial_bankroll, "Account created");

    Ok(Account {
        account_id,
        username: username.to_string(),
        bankroll: initial_bankroll,
        is_bot,
        active: true,
        created_at: now,
    })
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

pub async fn get_round(
    conn: &mut SqliteConnection,
    round_id: i64,
) -> Result<Option<Round>, sqlx::Error> {
    sqlx::query("SELECT * FROM rounds WHERE round_id = ?")
        .bind(round_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| round_from_row(&row))
        .transpose()
}

pub async fn get_round_by_number(
    conn: &mut SqliteConnection,
    round_number: i64,
    year: i64,
) -> Result<Option<Round>, sqlx::Error> {
    sqlx::query("SELECT * FROM rounds WHERE round_number = ? AND year = ?")
        .bind(round_number)
        .bind(year)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| round_from_row(&row))
        .transpose()
}

pub async fn insert_round(
    conn: &mut SqliteConnection,
    round_number: i64,
    year: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
) -> Result<Round, sqlx::Error> {
    let round_id = sqlx::query(
        "INSERT INTO rounds (round_number, year, start_date, end_date, status)
         VALUES (?, ?, ?, ?, 'Upcoming')",
    )
    .bind(round_number)
    .bind(year)
    .bind(encode_time(start_date))
    .bind(encode_time(end_date))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Round {
        round_id,
        round_number,
        year,
        start_date,
        end_date,
        status: RoundStatus::Upcoming,
    })
}

pub async fn list_rounds_with_status(
    conn: &mut SqliteConnection,
    status: RoundStatus,
) -> Result<Vec<Round>, sqlx::Error> {
    sqlx::query("SELECT * FROM rounds WHERE status = ? ORDER BY year, round_number")
        .bind(status.to_string())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(round_from_row)
        .collect()
}

pub async fn update_round_status(
    conn: &mut SqliteConnection,
    round_id: i64,
    status: RoundStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE rounds SET status = ? WHERE round_id = ?")
        .bind(status.to_string())
        .bind(round_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

pub async fn get_market(
    conn: &mut SqliteConnection,
    market_id: i64,
) -> Result<Option<Market>, sqlx::Error> {
    sqlx::query("SELECT * FROM markets WHERE market_id = ?")
        .bind(market_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| market_from_row(&row))
        .transpose()
}

pub async fn list_markets_for_round(
    conn: &mut SqliteConnection,
    round_id: i64,
) -> Result<Vec<Market>, sqlx::Error> {
    sqlx::query("SELECT * FROM markets WHERE round_id = ? ORDER BY start_time")
        .bind(round_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(market_from_row)
        .collect()
}

/// Markets that may still need a result check: scheduled or in play.
pub async fn list_unresolved_markets(
    conn: &mut SqliteConnection,
) -> Result<Vec<Market>, sqlx::Error> {
    sqlx::query("SELECT * FROM markets WHERE status IN ('Scheduled', 'Live') ORDER BY start_time")
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(market_from_row)
        .collect()
}

pub async fn insert_market(
    conn: &mut SqliteConnection,
    round_id: i64,
    external_ref: Option<&str>,
    home_team: &str,
    away_team: &str,
    start_time: DateTime<Utc>,
) -> Result<Market, sqlx::Error> {
    let market_id = sqlx::query(
        "INSERT INTO markets (external_ref, round_id, home_team, away_team, start_time, status)
         VALUES (?, ?, ?, ?, ?, 'Scheduled')",
    )
    .bind(external_ref)
    .bind(round_id)
    .bind(home_team)
    .bind(away_team)
    .bind(encode_time(start_time))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Market {
        market_id,
        external_ref: external_ref.map(str::to_string),
        round_id,
        home_team: home_team.to_string(),
        away_team: away_team.to_string(),
        start_time,
        home_odds: None,
        away_odds: None,
        status: MarketStatus::Scheduled,
        result_home_score: None,
        result_away_score: None,
        winner: None,
        last_odds_update: None,
    })
}

/// Refresh market odds. Only meaningful while the market is `Scheduled`;
/// the caller (odds ingest) enforces that.
pub async fn update_market_odds(
    conn: &mut SqliteConnection,
    market_id: i64,
    home_odds: Option<Decimal>,
    away_odds: Option<Decimal>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE markets SET home_odds = ?, away_odds = ?, last_odds_update = ?
         WHERE market_id = ?",
    )
    .bind(home_odds.map(encode_decimal))
    .bind(away_odds.map(encode_decimal))
    .bind(encode_time(Utc::now()))
    .bind(market_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Move a market between non-terminal statuses (Live, Postponed, ...).
/// The `Completed` transition is the settlement engine's alone.
pub async fn update_market_status(
    conn: &mut SqliteConnection,
    market_id: i64,
    status: MarketStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE markets SET status = ? WHERE market_id = ?")
        .bind(status.to_string())
        .bind(market_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Wagers
// ---------------------------------------------------------------------------

pub async fn get_wager(
    conn: &mut SqliteConnection,
    wager_id: i64,
) -> Result<Option<Wager>, sqlx::Error> {
    sqlx::query("SELECT * FROM wagers WHERE wager_id = ?")
        .bind(wager_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| wager_from_row(&row))
        .transpose()
}

pub async fn pending_wagers_for_market(
    conn: &mut SqliteConnection,
    market_id: i64,
) -> Result<Vec<Wager>, sqlx::Error> {
    sqlx::query("SELECT * FROM wagers WHERE market_id = ? AND status = 'Pending' ORDER BY wager_id")
        .bind(market_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(wager_from_row)
        .collect()
}

pub async fn wagers_for_account(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> Result<Vec<Wager>, sqlx::Error> {
    sqlx::query("SELECT * FROM wagers WHERE account_id = ? ORDER BY wager_id")
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(wager_from_row)
        .collect()
}

/// Whether the account already has an unresolved wager on this market.
pub async fn has_pending_wager(
    conn: &mut SqliteConnection,
    account_id: i64,
    market_id: i64,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM wagers
         WHERE account_id = ? AND market_id = ? AND status = 'Pending'",
    )
    .bind(account_id)
    .bind(market_id)
    .fetch_one(&mut *conn)
    .await?;
    let count: i64 = row.try_get("n")?;
    Ok(count > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
