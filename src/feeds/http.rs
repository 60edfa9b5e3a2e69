//! HTTP fixture feed.
//!
//! A reqwest-backed client implementing both feed traits against a
//! JSON fixture service. One endpoint serves odds and results for a
//! single match, addressed by team names and round context:
//!
//! `GET {base}/fixture?home=..&away=..&round=N&year=Y`
//!
//! Team names go through URL encoding — they contain spaces.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FeedStatus, MarketKey, OddsFeed, OddsQuote, ResultFeed, ResultUpdate};

const USER_AGENT: &str = "punt/0.1";
const REQUEST_TIMEOUT_SECS: u64 = 20;

// ---------------------------------------------------------------------------
// API response types (fixture JSON -> Rust)
// ---------------------------------------------------------------------------

/// One fixture as served by the feed.
#[derive(Debug, Deserialize)]
struct FixtureDto {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    home_score: Option<i64>,
    #[serde(default)]
    away_score: Option<i64>,
    #[serde(default)]
    home_odds: Option<Decimal>,
    #[serde(default)]
    away_odds: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpFixtureFeed {
    client: Client,
    base_url: String,
}

impl HttpFixtureFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build fixture feed HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn fixture_url(&self, key: &MarketKey) -> String {
        format!(
            "{}/fixture?home={}&away={}&round={}&year={}",
            self.base_url,
            urlencoding::encode(&key.home_team),
            urlencoding::encode(&key.away_team),
            key.round_number,
            key.year,
        )
    }

    /// Fetch the fixture for a market. `Ok(None)` when the feed doesn't
    /// know the match (404).
    async fn fetch_fixture(&self, key: &MarketKey) -> Result<Option<FixtureDto>> {
        let url = self.fixture_url(key);
        debug!(%url, "Fetching fixture");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Fixture request failed for {key}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("Fixture feed returned an error for {key}"))?;

        let fixture: FixtureDto = response
            .json()
            .await
            .with_context(|| format!("Invalid fixture JSON for {key}"))?;
        Ok(Some(fixture))
    }
}

#[async_trait]
impl OddsFeed for HttpFixtureFeed {
    async fn fetch_odds(&self, key: &MarketKey) -> Result<Option<OddsQuote>> {
        Ok(self.fetch_fixture(key).await?.map(|f| OddsQuote {
            home_odds: f.home_odds,
            away_odds: f.away_odds,
        }))
    }

    fn name(&self) -> &str {
        "http-fixture"
    }
}

#[async_trait]
impl ResultFeed for HttpFixtureFeed {
    async fn fetch_result(&self, key: &MarketKey) -> Result<ResultUpdate> {
        match self.fetch_fixture(key).await? {
            Some(fixture) => Ok(ResultUpdate {
                status: fixture
                    .status
                    .as_deref()
                    .map(FeedStatus::parse)
                    .unwrap_or(FeedStatus::Unknown),
                home_score: fixture.home_score,
                away_score: fixture.away_score,
            }),
            None => Ok(ResultUpdate {
                status: FeedStatus::Unknown,
                home_score: None,
                away_score: None,
            }),
        }
    }

    fn name(&self) -> &str {
        "http-fixture"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
