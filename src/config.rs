//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Values that vary by deployment (the database URL, the feed base URL)
//! can be overridden through environment variables resolved at startup.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub api: ApiSettings,
    pub jobs: JobsSettings,
    pub rounds: RoundsSettings,
    pub bot: BotSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub name: String,
    pub database_url: String,
    /// Bankroll granted to newly created accounts.
    pub initial_bankroll: Decimal,
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsSettings {
    pub odds_interval_secs: u64,
    pub results_interval_secs: u64,
    pub rounds_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoundsSettings {
    /// Credited to every active account when a round starts.
    pub bonus_amount: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotSettings {
    pub enabled: bool,
    pub username: String,
    pub max_stake_fraction: Decimal,
    pub min_stake: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedSettings {
    pub base_url: String,
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;

        if let Ok(url) = std::env::var("PUNT_DATABASE_URL") {
            config.app.database_url = url;
        }
        if let Ok(url) = std::env::var("PUNT_FEED_BASE_URL") {
            config.feed.base_url = url;
        }

        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [app]
        name = "PUNT-001"
        database_url = "sqlite://punt.db"
        initial_bankroll = 1000.0
        currency = "AUD"

        [api]
        enabled = true
        port = 8090

        [jobs]
        odds_interval_secs = 3600
        results_interval_secs = 300
        rounds_interval_secs = 900

        [rounds]
        bonus_amount = 1000.0

        [bot]
        enabled = true
        username = "LogisticsRegressionBot"
        max_stake_fraction = 0.10
        min_stake = 0.01

        [feed]
        base_url = "http://localhost:9100"
    "#;

    #[test]
    fn test_parse_sample_config() {
        let cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.app.name, "PUNT-001");
        assert_eq!(cfg.app.initial_bankroll, dec!(1000));
        assert_eq!(cfg.api.port, 8090);
        assert_eq!(cfg.jobs.results_interval_secs, 300);
        assert_eq!(cfg.rounds.bonus_amount, dec!(1000));
        assert_eq!(cfg.bot.max_stake_fraction, dec!(0.10));
        assert!(cfg.bot.enabled);
        assert_eq!(cfg.feed.base_url, "http://localhost:9100");
    }

    #[test]
    fn test_missing_section_fails() {
        let result: Result<AppConfig, _> = toml::from_str("[app]\nname = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file() {
        // Requires config.toml in the working directory; acceptable to
        // skip in environments that run tests elsewhere.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(cfg.app.initial_bankroll > Decimal::ZERO);
            assert!(cfg.bot.max_stake_fraction <= dec!(1));
        }
    }
}
