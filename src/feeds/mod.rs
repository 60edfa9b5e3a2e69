//! External data feeds.
//!
//! Defines the `OddsFeed` and `ResultFeed` collaborator seams and the
//! ingest jobs that apply their output to stored markets. The core never
//! scrapes anything itself — it consumes whatever the injected feed
//! produces.
//!
//! A `Finished` result with both scores present is the sole trigger for
//! settlement. Every other feed status only maps onto the market's
//! status and never settles anything.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, info, warn};

use crate::settlement::{SettleError, SettlementEngine};
use crate::store;
use crate::types::{Market, MarketStatus, Round};

// ---------------------------------------------------------------------------
// Feed vocabulary
// ---------------------------------------------------------------------------

/// Match status as reported by a result feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Scheduled,
    Live,
    Finished,
    Postponed,
    Cancelled,
    Unknown,
    Error,
}

impl FeedStatus {
    /// Translate upstream status vocabulary into ours. Unmapped values
    /// come back as `Unknown` rather than failing the poll.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "scheduled" | "upcoming" | "pre" => FeedStatus::Scheduled,
            "live" | "inprogress" | "in_progress" => FeedStatus::Live,
            "finished" | "fulltime" | "full_time" | "post" => FeedStatus::Finished,
            "postponed" => FeedStatus::Postponed,
            "cancelled" | "canceled" | "abandoned" => FeedStatus::Cancelled,
            "error" => FeedStatus::Error,
            other => {
                warn!(status = other, "Unmapped feed status");
                FeedStatus::Unknown
            }
        }
    }

    /// The market status this feed status maps onto, when it is a pure
    /// status update. `Finished` returns `None` — that path goes through
    /// settlement, never a bare status write.
    pub fn target_market_status(&self) -> Option<MarketStatus> {
        match self {
            FeedStatus::Scheduled => Some(MarketStatus::Scheduled),
            FeedStatus::Live => Some(MarketStatus::Live),
            FeedStatus::Postponed => Some(MarketStatus::Postponed),
            FeedStatus::Cancelled => Some(MarketStatus::Cancelled),
            FeedStatus::Finished | FeedStatus::Unknown | FeedStatus::Error => None,
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStatus::Scheduled => write!(f, "Scheduled"),
            FeedStatus::Live => write!(f, "Live"),
            FeedStatus::Finished => write!(f, "Finished"),
            FeedStatus::Postponed => write!(f, "Postponed"),
            FeedStatus::Cancelled => write!(f, "Cancelled"),
            FeedStatus::Unknown => write!(f, "Unknown"),
            FeedStatus::Error => write!(f, "Error"),
        }
    }
}

/// How a market is identified to upstream feeds: team names plus the
/// round context and kickoff time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketKey {
    pub home_team: String,
    pub away_team: String,
    pub round_number: i64,
    pub year: i64,
    pub start_time: DateTime<Utc>,
}

impl MarketKey {
    pub fn for_market(market: &Market, round: &Round) -> Self {
        Self {
            home_team: market.home_team.clone(),
            away_team: market.away_team.clone(),
            round_number: round.round_number,
            year: round.year,
            start_time: market.start_time,
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vs {} (R{} {})",
            self.home_team, self.away_team, self.round_number, self.year,
        )
    }
}

/// A pair of decimal odds; either side may still be unquoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OddsQuote {
    pub home_odds: Option<Decimal>,
    pub away_odds: Option<Decimal>,
}

impl OddsQuote {
    pub fn is_empty(&self) -> bool {
        self.home_odds.is_none() && self.away_odds.is_none()
    }
}

/// Result-feed output for one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultUpdate {
    pub status: FeedStatus,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
}

impl ResultUpdate {
    /// Whether this update is the settlement trigger: finished with
    /// both scores present.
    pub fn is_final(&self) -> bool {
        self.status == FeedStatus::Finished
            && self.home_score.is_some()
            && self.away_score.is_some()
    }
}

/// Produces current odds for a market while it is open.
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// `Ok(None)` means the feed doesn't know this market (yet).
    async fn fetch_odds(&self, key: &MarketKey) -> anyhow::Result<Option<OddsQuote>>;

    fn name(&self) -> &str;
}

/// Produces status and scores for a market.
#[async_trait]
pub trait ResultFeed: Send + Sync {
    async fn fetch_result(&self, key: &MarketKey) -> anyhow::Result<ResultUpdate>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Odds ingest
// ---------------------------------------------------------------------------

/// Refresh odds for every `Scheduled` market in a round. Markets past
/// `Scheduled` keep whatever odds they froze with.
pub async fn refresh_odds(
    pool: &SqlitePool,
    feed: &dyn OddsFeed,
    round: &Round,
) -> anyhow::Result<usize> {
    let markets = {
        let mut conn = pool.acquire().await?;
        store::list_markets_for_round(&mut conn, round.round_id).await?
    };

    let mut updated = 0;
    for market in markets.iter().filter(|m| m.status == MarketStatus::Scheduled) {
        let key = MarketKey::for_market(market, round);
        match feed.fetch_odds(&key).await {
            Ok(Some(quote)) if !quote.is_empty() => {
                let mut conn = pool.acquire().await?;
                store::update_market_odds(
                    &mut conn,
                    market.market_id,
                    quote.home_odds,
                    quote.away_odds,
                )
                .await?;
                updated += 1;
            }
            Ok(_) => debug!(market = %key, feed = feed.name(), "No odds available"),
            Err(e) => warn!(market = %key, feed = feed.name(), error = %e, "Odds fetch failed"),
        }
    }

    info!(
        round = %round,
        feed = feed.name(),
        updated,
        "Odds refresh complete"
    );
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Result ingest
// ---------------------------------------------------------------------------

/// Outcome of one result-polling pass.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub checked: usize,
    pub settled: usize,
    pub status_changes: usize,
    pub fetch_failures: usize,
}

impl fmt::Display for PollReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} settled={} status_changes={} fetch_failures={}",
            self.checked, self.settled, self.status_changes, self.fetch_failures,
        )
    }
}

/// Poll results for every unresolved market that has kicked off.
///
/// Transient failures (fetch errors, settlement storage errors) are
/// logged and left for the next pass; `AlreadySettled` from a racing
/// settle is a safe no-op.
pub async fn poll_results(
    pool: &SqlitePool,
    feed: &dyn ResultFeed,
    engine: &SettlementEngine,
) -> anyhow::Result<PollReport> {
    let now = Utc::now();
    let due: Vec<(Market, Round)> = {
        let mut conn = pool.acquire().await?;
        let markets = store::list_unresolved_markets(&mut conn).await?;
        let mut due = Vec::new();
        for market in markets {
            if market.start_time > now {
                continue;
            }
            let Some(round) = store::get_round(&mut conn, market.round_id).await? else {
                warn!(market_id = market.market_id, "Market has no round; skipping");
                continue;
            };
            due.push((market, round));
        }
        due
    };

    let mut report = PollReport { checked: due.len(), ..Default::default() };
    if due.is_empty() {
        return Ok(report);
    }

    let keys: Vec<MarketKey> = due
        .iter()
        .map(|(market, round)| MarketKey::for_market(market, round))
        .collect();
    let fetches = keys.iter().map(|key| feed.fetch_result(key));
    let results = futures::future::join_all(fetches).await;

    for ((market, _round), result) in due.iter().zip(results) {
        let update = match result {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    market_id = market.market_id,
                    feed = feed.name(),
                    error = %e,
                    "Result fetch failed"
                );
                report.fetch_failures += 1;
                continue;
            }
        };

        if update.is_final() {
            let (home, away) = (update.home_score.unwrap(), update.away_score.unwrap());
            match engine.settle_market(market.market_id, home, away).await {
                Ok(summary) => {
                    info!(%summary, "Settled from result feed");
                    report.settled += 1;
                }
                Err(SettleError::AlreadySettled(id)) => {
                    info!(market_id = id, "Already settled; ignoring");
                }
                Err(e) => {
                    warn!(
                        market_id = market.market_id,
                        error = %e,
                        "Settlement failed; will retry next poll"
                    );
                }
            }
        } else if let Some(new_status) = update.status.target_market_status() {
            if new_status != market.status {
                let mut conn = pool.acquire().await?;
                store::update_market_status(&mut conn, market.market_id, new_status).await?;
                info!(
                    market_id = market.market_id,
                    from = %market.status,
                    to = %new_status,
                    "Market status updated from feed"
                );
                report.status_changes += 1;
            }
        } else {
            debug!(
                market_id = market.market_id,
                status = %update.status,
                "No actionable update"
            );
        }
    }

    info!(%report, "Result poll complete");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
