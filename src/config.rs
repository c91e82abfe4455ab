//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at startup into [`SecretString`]s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::{FairwayError, Phase};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub exits: ExitConfig,
    #[serde(default)]
    pub model_feed: ModelFeedConfig,
    #[serde(default)]
    pub market_feed: MarketFeedConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// SQLite connection URL for the position ledger.
    pub database_url: String,
    /// Bankroll used to express stakes in dollars.
    pub bankroll: f64,
}

/// Phase → poll interval table, in seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub live_round_secs: u64,
    pub between_rounds_secs: u64,
    pub pre_tournament_secs: u64,
    pub idle_secs: u64,
    /// Interval after a failed cycle.
    pub retry_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            live_round_secs: 120,
            between_rounds_secs: 1800,
            pre_tournament_secs: 1800,
            idle_secs: 3600,
            retry_secs: 120,
        }
    }
}

impl PollingConfig {
    /// Next poll interval for a phase.
    pub fn interval_for(&self, phase: Phase) -> Duration {
        let secs = match phase {
            Phase::LiveRound => self.live_round_secs,
            Phase::BetweenRounds => self.between_rounds_secs,
            Phase::PreTournament => self.pre_tournament_secs,
            Phase::Finished | Phase::Idle => self.idle_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Edge (percentage points) required before round adjustment.
    pub base_min_edge: f64,
    /// Widest YES bid/ask spread accepted, in cents.
    pub max_spread_cents: f64,
    /// Fuzzy name-match cutoff (0.0–1.0).
    pub name_match_cutoff: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_min_edge: 8.0,
            max_spread_cents: 15.0,
            name_match_cutoff: 0.6,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingConfig {
    pub kelly_fraction: f64,
    pub max_stake_pct: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            max_stake_pct: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExitConfig {
    /// Bid gain over entry (cents) that triggers a profit exit.
    pub profit_target_cents: f64,
    /// Current edge at or below this triggers an exit.
    pub edge_reversal_pct: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            profit_target_cents: 15.0,
            edge_reversal_pct: -8.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelFeedConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub tour: String,
    pub timeout_secs: u64,
}

impl Default for ModelFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://feeds.datagolf.com".to_string(),
            api_key_env: "DATAGOLF_API_KEY".to_string(),
            tour: "pga".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketFeedConfig {
    pub base_url: String,
    /// Series tickers searched for golf events.
    pub series: Vec<String>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub series_pause_ms: u64,
    pub timeout_secs: u64,
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
            series: vec![
                "KXPGATOUR".to_string(),
                "KXPGA".to_string(),
                "KXPGATOP5".to_string(),
                "KXPGATOP10".to_string(),
                "KXPGATOP20".to_string(),
                "KXPGACUT".to_string(),
            ],
            max_attempts: 3,
            backoff_base_ms: 1000,
            series_pause_ms: 500,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    /// Minimum minutes between recommendation alerts for one ticker.
    pub cooldown_minutes: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { cooldown_minutes: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8090,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FairwayError> {
        if self.agent.bankroll <= 0.0 {
            return Err(FairwayError::Config("agent.bankroll must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.sizing.kelly_fraction) {
            return Err(FairwayError::Config(
                "sizing.kelly_fraction must be within 0..=1".into(),
            ));
        }
        if self.market_feed.max_attempts == 0 {
            return Err(FairwayError::Config(
                "market_feed.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret referenced by env-var name.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
