//! Scripted feeds for integration testing.
//!
//! Deterministic `OddsFeed` / `ResultFeed` implementations whose
//! responses are fully controllable from test code — all in-memory with
//! no network dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use punt::feeds::{FeedStatus, MarketKey, OddsFeed, OddsQuote, ResultFeed, ResultUpdate};

/// A feed whose odds and results are keyed by `(home_team, away_team)`.
///
/// Unknown matches return `None` odds and an `Unknown` result, matching
/// how a real feed behaves for fixtures it hasn't listed yet. A forced
/// error makes every call fail, for failure-path tests.
pub struct ScriptedFeed {
    odds: Mutex<HashMap<(String, String), OddsQuote>>,
    results: Mutex<HashMap<(String, String), ResultUpdate>>,
    force_error: Mutex<Option<String>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self {
            odds: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            force_error: Mutex::new(None),
        }
    }

    pub fn set_odds(&self, home: &str, away: &str, home_odds: Decimal, away_odds: Decimal) {
        self.odds.lock().unwrap().insert(
            (home.to_string(), away.to_string()),
            OddsQuote { home_odds: Some(home_odds), away_odds: Some(away_odds) },
        );
    }

    pub fn set_result(&self, home: &str, away: &str, status: FeedStatus, score: Option<(i64, i64)>) {
        self.results.lock().unwrap().insert(
            (home.to_string(), away.to_string()),
            ResultUpdate {
                status,
                home_score: score.map(|(h, _)| h),
                away_score: score.map(|(_, a)| a),
            },
        );
    }

    /// Force all subsequent calls to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn check_error(&self) -> Result<()> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{msg}"));
        }
        Ok(())
    }
}

#[async_trait]
impl OddsFeed for ScriptedFeed {
    async fn fetch_odds(&self, key: &MarketKey) -> Result<Option<OddsQuote>> {
        self.check_error()?;
        Ok(self
            .odds
            .lock()
            .unwrap()
            .get(&(key.home_team.clone(), key.away_team.clone()))
            .cloned())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[async_trait]
impl ResultFeed for ScriptedFeed {
    async fn fetch_result(&self, key: &MarketKey) -> Result<ResultUpdate> {
        self.check_error()?;
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(&(key.home_team.clone(), key.away_team.clone()))
            .cloned()
            .unwrap_or(ResultUpdate {
                status: FeedStatus::Unknown,
                home_score: None,
                away_score: None,
            }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn key(home: &str, away: &str) -> MarketKey {
        MarketKey {
            home_team: home.to_string(),
            away_team: away.to_string(),
            round_number: 1,
            year: 2025,
            start_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scripted_odds() {
        let feed = ScriptedFeed::new();
        feed.set_odds("Broncos", "Cowboys", dec!(1.90), dec!(2.10));

        let quote = feed.fetch_odds(&key("Broncos", "Cowboys")).await.unwrap().unwrap();
        assert_eq!(quote.home_odds, Some(dec!(1.90)));

        let unknown = feed.fetch_odds(&key("Storm", "Raiders")).await.unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_scripted_results_default_unknown() {
        let feed = ScriptedFeed::new();
        let update = feed.fetch_result(&key("Storm", "Raiders")).await.unwrap();
        assert_eq!(update.status, FeedStatus::Unknown);
        assert!(!update.is_final());
    }

    #[tokio::test]
    async fn test_forced_error() {
        let feed = ScriptedFeed::new();
        feed.set_error("simulated outage");
        assert!(feed.fetch_odds(&key("A", "B")).await.is_err());
        assert!(feed.fetch_result(&key("A", "B")).await.is_err());

        feed.clear_error();
        assert!(feed.fetch_odds(&key("A", "B")).await.is_ok());
    }
}
