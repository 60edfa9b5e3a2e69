//! Shared types for the PUNT backend.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that store, betting, settlement,
//! and bot modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a market.
///
/// `Completed` is terminal: it is entered exactly once, by the settlement
/// engine, together with the final scores and winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketStatus {
    Scheduled,
    Live,
    Postponed,
    Cancelled,
    Completed,
}

impl MarketStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Completed | MarketStatus::Cancelled)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Scheduled => write!(f, "Scheduled"),
            MarketStatus::Live => write!(f, "Live"),
            MarketStatus::Postponed => write!(f, "Postponed"),
            MarketStatus::Cancelled => write!(f, "Cancelled"),
            MarketStatus::Completed => write!(f, "Completed"),
        }
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(MarketStatus::Scheduled),
            "Live" => Ok(MarketStatus::Live),
            "Postponed" => Ok(MarketStatus::Postponed),
            "Cancelled" => Ok(MarketStatus::Cancelled),
            "Completed" => Ok(MarketStatus::Completed),
            _ => Err(anyhow::anyhow!("Unknown market status: {s}")),
        }
    }
}

/// Lifecycle status of a wager.
///
/// Transitions only `Pending -> {Won, Lost, Void}`, exactly once,
/// never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Void,
}

impl WagerStatus {
    /// Whether the wager has been resolved by settlement.
    pub fn is_settled(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Pending => write!(f, "Pending"),
            WagerStatus::Won => write!(f, "Won"),
            WagerStatus::Lost => write!(f, "Lost"),
            WagerStatus::Void => write!(f, "Void"),
        }
    }
}

impl std::str::FromStr for WagerStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WagerStatus::Pending),
            "Won" => Ok(WagerStatus::Won),
            "Lost" => Ok(WagerStatus::Lost),
            "Void" => Ok(WagerStatus::Void),
            _ => Err(anyhow::anyhow!("Unknown wager status: {s}")),
        }
    }
}

/// Lifecycle status of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Upcoming,
    Active,
    Completed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Upcoming => write!(f, "Upcoming"),
            RoundStatus::Active => write!(f, "Active"),
            RoundStatus::Completed => write!(f, "Completed"),
        }
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Upcoming" => Ok(RoundStatus::Upcoming),
            "Active" => Ok(RoundStatus::Active),
            "Completed" => Ok(RoundStatus::Completed),
            _ => Err(anyhow::anyhow!("Unknown round status: {s}")),
        }
    }
}

/// The kind of bankroll change a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    InitialDeposit,
    RoundBonus,
    WagerPlacement,
    WagerWin,
    WagerLoss,
    WagerVoid,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::InitialDeposit => write!(f, "InitialDeposit"),
            ChangeKind::RoundBonus => write!(f, "RoundBonus"),
            ChangeKind::WagerPlacement => write!(f, "WagerPlacement"),
            ChangeKind::WagerWin => write!(f, "WagerWin"),
            ChangeKind::WagerLoss => write!(f, "WagerLoss"),
            ChangeKind::WagerVoid => write!(f, "WagerVoid"),
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InitialDeposit" => Ok(ChangeKind::InitialDeposit),
            "RoundBonus" => Ok(ChangeKind::RoundBonus),
            "WagerPlacement" => Ok(ChangeKind::WagerPlacement),
            "WagerWin" => Ok(ChangeKind::WagerWin),
            "WagerLoss" => Ok(ChangeKind::WagerLoss),
            "WagerVoid" => Ok(ChangeKind::WagerVoid),
            _ => Err(anyhow::anyhow!("Unknown change kind: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Match result
// ---------------------------------------------------------------------------

/// Outcome of a completed match, relative to the market's two teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Home,
    Away,
    Draw,
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Home => write!(f, "Home"),
            MatchResult::Away => write!(f, "Away"),
            MatchResult::Draw => write!(f, "Draw"),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A user account holding a virtual bankroll.
///
/// The bankroll is mutated only by the betting service, the settlement
/// engine, and the round bonus job — always inside the same transaction
/// as the corresponding ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub username: String,
    pub bankroll: Decimal,
    pub is_bot: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (#{}) balance=${:.2}{}",
            self.username,
            self.account_id,
            self.bankroll,
            if self.is_bot { " [bot]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// A competition round grouping markets, unique per (round_number, year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round_id: i64,
    pub round_number: i64,
    pub year: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: RoundStatus,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} R{} ({})", self.year, self.round_number, self.status)
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A bettable two-outcome market (one match).
///
/// Odds are nullable until a feed populates them and may be refreshed
/// while `Scheduled`; they are only ever read and locked in at placement
/// time. Scores and winner are set exactly once, by the settlement
/// engine, on the transition into `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: i64,
    /// Identifier from the upstream fixture feed, if known.
    pub external_ref: Option<String>,
    pub round_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
    pub home_odds: Option<Decimal>,
    pub away_odds: Option<Decimal>,
    pub status: MarketStatus,
    pub result_home_score: Option<i64>,
    pub result_away_score: Option<i64>,
    /// Winning team name, or "Draw". Set only at settlement.
    pub winner: Option<String>,
    pub last_odds_update: Option<DateTime<Utc>>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} vs {} @ {} ({})",
            self.market_id, self.home_team, self.away_team, self.start_time, self.status,
        )
    }
}

impl Market {
    /// Whether wagers may currently be placed against this market.
    pub fn is_open_for_wagers(&self, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Scheduled && now < self.start_time
    }

    /// Odds for the given team name, or `None` if the name matches
    /// neither team or the matching side has no odds yet.
    pub fn odds_for(&self, team: &str) -> Option<Decimal> {
        if team == self.home_team {
            self.home_odds
        } else if team == self.away_team {
            self.away_odds
        } else {
            None
        }
    }

    /// Determine the match result from final scores. Pure — persisting
    /// the transition is the settlement engine's job.
    pub fn apply_result(&self, home_score: i64, away_score: i64) -> MatchResult {
        match home_score.cmp(&away_score) {
            std::cmp::Ordering::Greater => MatchResult::Home,
            std::cmp::Ordering::Less => MatchResult::Away,
            std::cmp::Ordering::Equal => MatchResult::Draw,
        }
    }

    /// The winner label stored on the market and compared against
    /// `Wager::team_selected`: a team name, or "Draw".
    pub fn winner_name(&self, result: MatchResult) -> String {
        match result {
            MatchResult::Home => self.home_team.clone(),
            MatchResult::Away => self.away_team.clone(),
            MatchResult::Draw => "Draw".to_string(),
        }
    }

    /// Helper to build a test/sample market with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        Market {
            market_id: 1,
            external_ref: Some("ext-001".to_string()),
            round_id: 1,
            home_team: "Broncos".to_string(),
            away_team: "Cowboys".to_string(),
            start_time: Utc::now() + chrono::Duration::days(2),
            home_odds: Some(Decimal::new(190, 2)),
            away_odds: Some(Decimal::new(210, 2)),
            status: MarketStatus::Scheduled,
            result_home_score: None,
            result_away_score: None,
            winner: None,
            last_odds_update: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// One account's stake on one team of one market.
///
/// Odds are snapshotted at placement and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub wager_id: i64,
    pub account_id: i64,
    pub market_id: i64,
    pub round_id: i64,
    pub team_selected: String,
    pub stake: Decimal,
    pub odds_at_placement: Decimal,
    /// `stake * odds_at_placement`, rounded to cents. Stake included.
    pub potential_payout: Decimal,
    pub status: WagerStatus,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} acct:{} mkt:{} {} ${:.2} @ {} -> ${:.2} ({})",
            self.wager_id,
            self.account_id,
            self.market_id,
            self.team_selected,
            self.stake,
            self.odds_at_placement,
            self.potential_payout,
            self.status,
        )
    }
}

impl Wager {
    /// Total payout for a winning wager: stake times decimal odds,
    /// rounded half-away-from-zero to cents.
    pub fn compute_payout(stake: Decimal, odds: Decimal) -> Decimal {
        (stake * odds).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// An immutable record of one bankroll-affecting change.
///
/// Entries are append-only: replaying every entry for an account in
/// insertion order from zero reproduces the live bankroll exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub account_id: i64,
    pub round_number: Option<i64>,
    pub change_kind: ChangeKind,
    pub wager_id: Option<i64>,
    /// Signed change applied to the bankroll.
    pub amount_delta: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} acct:{} {} {:+.2} ({:.2} -> {:.2})",
            self.entry_id,
            self.account_id,
            self.change_kind,
            self.amount_delta,
            self.balance_before,
            self.balance_after,
        )
    }
}

impl LedgerEntry {
    /// Whether the entry's own arithmetic is consistent.
    pub fn is_consistent(&self) -> bool {
        self.balance_before + self.amount_delta == self.balance_after
    }
}

// ---------------------------------------------------------------------------
// Settlement summary
// ---------------------------------------------------------------------------

/// Result of settling one market: what happened to every pending wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub market_id: i64,
    pub winner: String,
    pub home_score: i64,
    pub away_score: i64,
    pub wagers_won: usize,
    pub wagers_lost: usize,
    pub wagers_voided: usize,
    /// Wagers skipped because their account row was missing.
    pub wagers_skipped: usize,
    /// Sum of all credits applied (wins + void refunds).
    pub total_paid_out: Decimal,
    pub settled_at: DateTime<Utc>,
}

impl SettlementSummary {
    /// Number of wagers whose status was transitioned.
    pub fn wagers_settled(&self) -> usize {
        self.wagers_won + self.wagers_lost + self.wagers_voided
    }
}

impl fmt::Display for SettlementSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "market #{} {}-{} winner={} | W{}/L{}/V{} skipped={} paid=${:.2}",
            self.market_id,
            self.home_score,
            self.away_score,
            self.winner,
            self.wagers_won,
            self.wagers_lost,
            self.wagers_voided,
            self.wagers_skipped,
            self.total_paid_out,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
