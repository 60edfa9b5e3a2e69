//! PUNT — Sports tipping, bankroll ledger and settlement engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, seeds the bot account, spawns the API server, and
//! runs the feed/round job loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use punt::api;
use punt::api::routes::AppState;
use punt::betting::BettingService;
use punt::bot::{NullModel, TipBot, TipBotConfig};
use punt::config::AppConfig;
use punt::events::{EventSink, TracingSink};
use punt::feeds::http::HttpFixtureFeed;
use punt::feeds::{self, OddsFeed};
use punt::rounds::RoundService;
use punt::settlement::SettlementEngine;
use punt::store;
use punt::types::RoundStatus;

const BANNER: &str = r#"
 ____  _   _ _   _ _____
|  _ \| | | | \ | |_   _|
| |_) | | | |  \| | | |
|  __/| |_| | |\  | | |
|_|    \___/|_| \_| |_|

  Tipping, Bankroll Ledger & Settlement Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        app_name = %cfg.app.name,
        database_url = %cfg.app.database_url,
        currency = %cfg.app.currency,
        "PUNT starting up"
    );

    // -- Store ------------------------------------------------------------

    let pool = store::open_pool(&cfg.app.database_url).await?;
    store::init_schema(&pool).await?;

    // -- Components -------------------------------------------------------

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let betting = BettingService::new(pool.clone());
    let engine = SettlementEngine::new(pool.clone(), sink.clone());
    let round_service = RoundService::new(pool.clone(), sink.clone(), cfg.rounds.bonus_amount);

    let feed = HttpFixtureFeed::new(&cfg.feed.base_url)?;

    // Seed the bot account so placements have somewhere to debit.
    let bot = if cfg.bot.enabled {
        ensure_bot_account(&pool, &cfg).await?;
        // The prediction model is an external collaborator; until one is
        // wired up the bot runs against the null model and places nothing.
        info!("Bot enabled with no prediction model attached — predictions disabled");
        Some(TipBot::new(
            pool.clone(),
            betting.clone(),
            Arc::new(NullModel),
            TipBotConfig {
                username: cfg.bot.username.clone(),
                max_stake_fraction: cfg.bot.max_stake_fraction,
                min_stake: cfg.bot.min_stake,
            },
        ))
    } else {
        None
    };

    // -- API --------------------------------------------------------------

    if cfg.api.enabled {
        let state = Arc::new(AppState {
            pool: pool.clone(),
            betting: betting.clone(),
            engine: engine.clone(),
        });
        api::spawn_api(state, cfg.api.port);
    }

    // -- Job loop ---------------------------------------------------------

    let mut odds_tick = tokio::time::interval(Duration::from_secs(cfg.jobs.odds_interval_secs));
    let mut results_tick =
        tokio::time::interval(Duration::from_secs(cfg.jobs.results_interval_secs));
    let mut rounds_tick = tokio::time::interval(Duration::from_secs(cfg.jobs.rounds_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        odds_secs = cfg.jobs.odds_interval_secs,
        results_secs = cfg.jobs.results_interval_secs,
        rounds_secs = cfg.jobs.rounds_interval_secs,
        "Entering job loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = rounds_tick.tick() => {
                if let Err(e) = run_rounds_job(&round_service, bot.as_ref(), &pool).await {
                    error!(error = %e, "Round job failed — continuing");
                }
            }
            _ = odds_tick.tick() => {
                if let Err(e) = run_odds_job(&pool, &feed).await {
                    error!(error = %e, "Odds job failed — continuing");
                }
            }
            _ = results_tick.tick() => {
                if let Err(e) = feeds::poll_results(&pool, &feed, &engine).await {
                    error!(error = %e, "Results job failed — continuing");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("PUNT shut down cleanly.");
    Ok(())
}

/// Create the bot's account on first start.
async fn ensure_bot_account(pool: &sqlx::SqlitePool, cfg: &AppConfig) -> Result<()> {
    let existing = {
        let mut conn = pool.acquire().await?;
        store::get_account_by_username(&mut conn, &cfg.bot.username).await?
    };
    if existing.is_none() {
        let account =
            store::create_account(pool, &cfg.bot.username, cfg.app.initial_bankroll, true).await?;
        info!(account = %account, "Bot account created");
    }
    Ok(())
}

/// Activate due rounds (paying bonuses) and let the bot work each
/// active round.
async fn run_rounds_job(
    rounds: &RoundService,
    bot: Option<&TipBot>,
    pool: &sqlx::SqlitePool,
) -> Result<()> {
    rounds.activate_due_rounds(chrono::Utc::now()).await?;

    if let Some(bot) = bot {
        let active = {
            let mut conn = pool.acquire().await?;
            store::list_rounds_with_status(&mut conn, RoundStatus::Active).await?
        };
        for round in active {
            let report = bot.run_round(&round).await?;
            if report.wagers_placed > 0 {
                info!(%report, "Bot placed wagers");
            }
        }
    }
    Ok(())
}

/// Refresh odds for every active round while markets are still open.
async fn run_odds_job(pool: &sqlx::SqlitePool, feed: &dyn OddsFeed) -> Result<()> {
    let active = {
        let mut conn = pool.acquire().await?;
        store::list_rounds_with_status(&mut conn, RoundStatus::Active).await?
    };
    for round in active {
        feeds::refresh_odds(pool, feed, &round).await?;
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("punt=info"));

    let json_logging = std::env::var("PUNT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
