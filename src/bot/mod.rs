//! Automated tipster.
//!
//! Wraps a black-box prediction model behind the `PredictionModel` seam
//! and turns its recommendations into real wagers through the betting
//! service. The model's `stake_fraction` arrives already safety-scaled
//! and is applied to the bankroll exactly once, then capped at the
//! configured maximum fraction.
//!
//! The bot is idempotent per market: one stored prediction and at most
//! one pending wager, so re-running a round never doubles up.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::betting::{BettingService, PlaceWagerError};
use crate::store;
use crate::types::{Market, Round};

// ---------------------------------------------------------------------------
// Model seam
// ---------------------------------------------------------------------------

/// What the prediction model produces for one market.
#[derive(Debug, Clone)]
pub struct ModelPrediction {
    pub predicted_winner: String,
    pub home_win_probability: Decimal,
    pub away_win_probability: Decimal,
    pub model_confidence: Decimal,
    /// Team to back, or `None` for "no bet".
    pub recommended_team: Option<String>,
    /// Fraction of bankroll to stake. Already safety-scaled at the
    /// model boundary — never rescale it here.
    pub stake_fraction: Decimal,
}

/// Black-box win-probability model. The training pipeline behind it is
/// entirely out of scope; the bot only consumes its output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionModel: Send + Sync {
    /// `Ok(None)` means the model has nothing to say about this market.
    async fn predict(&self, market: &Market) -> anyhow::Result<Option<ModelPrediction>>;

    fn name(&self) -> &str;
}

/// Placeholder model used until a real predictor is wired up: the bot
/// runs, stores nothing, bets nothing.
pub struct NullModel;

#[async_trait]
impl PredictionModel for NullModel {
    async fn predict(&self, _market: &Market) -> anyhow::Result<Option<ModelPrediction>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "none"
    }
}

// ---------------------------------------------------------------------------
// Prediction persistence
// ---------------------------------------------------------------------------

async fn prediction_exists(
    conn: &mut SqliteConnection,
    account_id: i64,
    market_id: i64,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM predictions WHERE account_id = ? AND market_id = ?",
    )
    .bind(account_id)
    .bind(market_id)
    .fetch_one(&mut *conn)
    .await?;
    let count: i64 = row.try_get("n")?;
    Ok(count > 0)
}

async fn insert_prediction(
    conn: &mut SqliteConnection,
    account_id: i64,
    market_id: i64,
    prediction: &ModelPrediction,
) -> Result<i64, sqlx::Error> {
    let prediction_id = sqlx::query(
        "INSERT INTO predictions
         (account_id, market_id, predicted_winner, home_win_probability,
          away_win_probability, model_confidence, recommended_team,
          stake_fraction, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(market_id)
    .bind(&prediction.predicted_winner)
    .bind(store::encode_decimal(prediction.home_win_probability))
    .bind(store::encode_decimal(prediction.away_win_probability))
    .bind(store::encode_decimal(prediction.model_confidence))
    .bind(prediction.recommended_team.as_deref())
    .bind(store::encode_decimal(prediction.stake_fraction))
    .bind(store::encode_time(Utc::now()))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(prediction_id)
}

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TipBotConfig {
    /// Username of the bot's account.
    pub username: String,
    /// Hard ceiling on the fraction of bankroll per wager.
    pub max_stake_fraction: Decimal,
    /// Stakes below this are not worth placing.
    pub min_stake: Decimal,
}

impl Default for TipBotConfig {
    fn default() -> Self {
        Self {
            username: "LogisticsRegressionBot".to_string(),
            max_stake_fraction: dec!(0.10),
            min_stake: dec!(0.01),
        }
    }
}

/// Outcome of one bot pass over a round.
#[derive(Debug, Clone, Default)]
pub struct BotRunReport {
    pub round_number: i64,
    pub markets_considered: usize,
    pub predictions_stored: usize,
    pub wagers_placed: usize,
    pub skipped_existing: usize,
}

impl fmt::Display for BotRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} bot run: considered={} predicted={} wagered={} skipped={}",
            self.round_number,
            self.markets_considered,
            self.predictions_stored,
            self.wagers_placed,
            self.skipped_existing,
        )
    }
}

pub struct TipBot {
    pool: SqlitePool,
    betting: BettingService,
    model: Arc<dyn PredictionModel>,
    config: TipBotConfig,
}

impl TipBot {
    pub fn new(
        pool: SqlitePool,
        betting: BettingService,
        model: Arc<dyn PredictionModel>,
        config: TipBotConfig,
    ) -> Self {
        Self { pool, betting, model, config }
    }

    /// Predict and (where recommended) wager on every open market of a
    /// round. Validation failures on individual placements are logged
    /// and never abort the run; storage failures propagate.
    pub async fn run_round(&self, round: &Round) -> anyhow::Result<BotRunReport> {
        let bot = {
            let mut conn = self.pool.acquire().await?;
            store::get_account_by_username(&mut conn, &self.config.username)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("Bot account '{}' not found", self.config.username)
                })?
        };

        let markets = {
            let mut conn = self.pool.acquire().await?;
            store::list_markets_for_round(&mut conn, round.round_id).await?
        };

        let mut report = BotRunReport { round_number: round.round_number, ..Default::default() };
        let now = Utc::now();

        for market in &markets {
            if !market.is_open_for_wagers(now) {
                continue;
            }
            if market.home_odds.is_none() || market.away_odds.is_none() {
                debug!(market = %market, "Skipping market with missing odds");
                continue;
            }
            report.markets_considered += 1;

            {
                let mut conn = self.pool.acquire().await?;
                if prediction_exists(&mut conn, bot.account_id, market.market_id).await? {
                    report.skipped_existing += 1;
                    continue;
                }
            }

            let prediction = match self.model.predict(market).await {
                Ok(Some(prediction)) => prediction,
                Ok(None) => continue,
                Err(e) => {
                    warn!(market = %market, model = self.model.name(), error = %e, "Prediction failed");
                    continue;
                }
            };

            {
                let mut conn = self.pool.acquire().await?;
                insert_prediction(&mut conn, bot.account_id, market.market_id, &prediction)
                    .await?;
            }
            report.predictions_stored += 1;
            info!(
                market = %market,
                winner = %prediction.predicted_winner,
                confidence = %prediction.model_confidence,
                recommended = ?prediction.recommended_team,
                "Prediction stored"
            );

            let Some(team) = prediction.recommended_team.as_deref() else {
                continue;
            };
            if prediction.stake_fraction <= Decimal::ZERO {
                continue;
            }
            if team != market.home_team && team != market.away_team {
                warn!(market = %market, team, "Recommended team matches neither side");
                continue;
            }

            if self.place_recommended(bot.account_id, market, team, &prediction).await? {
                report.wagers_placed += 1;
            }
        }

        info!(%report, "Bot run complete");
        Ok(report)
    }

    /// Size and place one recommended wager. Returns whether a wager
    /// was actually placed.
    async fn place_recommended(
        &self,
        account_id: i64,
        market: &Market,
        team: &str,
        prediction: &ModelPrediction,
    ) -> anyhow::Result<bool> {
        {
            let mut conn = self.pool.acquire().await?;
            if store::has_pending_wager(&mut conn, account_id, market.market_id).await? {
                info!(market = %market, "Bot already has a pending wager; skipping");
                return Ok(false);
            }
        }

        // Balance may have moved since the round started — size off the
        // current bankroll.
        let bankroll = {
            let mut conn = self.pool.acquire().await?;
            store::get_account(&mut conn, account_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Bot account {account_id} vanished"))?
                .bankroll
        };

        let fraction = prediction.stake_fraction.min(self.config.max_stake_fraction);
        let stake = (bankroll * fraction)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if stake < self.config.min_stake {
            debug!(market = %market, %stake, "Sized stake below minimum; skipping");
            return Ok(false);
        }

        match self.betting.place_wager(account_id, market.market_id, team, stake).await {
            Ok(wager) => {
                info!(wager = %wager, "Bot wager placed");
                Ok(true)
            }
            Err(PlaceWagerError::Storage(e)) => Err(e.into()),
            Err(e) => {
                warn!(market = %market, error = %e, "Bot wager rejected");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
