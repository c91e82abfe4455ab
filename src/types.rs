//! Shared types for the FAIRWAY pipeline.
//!
//! These types form the data model used across all modules: feed records
//! normalised at the ingestion boundary, the persisted ledger rows, and the
//! lifecycle enums. Feed, strategy, engine and storage modules depend on
//! them without depending on each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of binary outcome a golf market settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    #[serde(rename = "winner")]
    Winner,
    #[serde(rename = "top5")]
    Top5,
    #[serde(rename = "top10")]
    Top10,
    #[serde(rename = "top20")]
    Top20,
    #[serde(rename = "make_cut")]
    MakeCut,
}

impl MarketType {
    pub const ALL: &'static [MarketType] = &[
        MarketType::Winner,
        MarketType::Top5,
        MarketType::Top10,
        MarketType::Top20,
        MarketType::MakeCut,
    ];

    /// Label used on market records and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Winner => "winner",
            MarketType::Top5 => "top5",
            MarketType::Top10 => "top10",
            MarketType::Top20 => "top20",
            MarketType::MakeCut => "make_cut",
        }
    }

    /// Key of the matching model probability.
    pub fn probability_key(&self) -> &'static str {
        match self {
            MarketType::Winner => "win",
            MarketType::Top5 => "top_5",
            MarketType::Top10 => "top_10",
            MarketType::Top20 => "top_20",
            MarketType::MakeCut => "make_cut",
        }
    }

    /// Finishing position a player must hold for the market to pay out,
    /// for placement markets only.
    pub fn qualification_threshold(&self) -> Option<u32> {
        match self {
            MarketType::Top5 => Some(5),
            MarketType::Top10 => Some(10),
            MarketType::Top20 => Some(20),
            MarketType::Winner | MarketType::MakeCut => None,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = FairwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "winner" => Ok(MarketType::Winner),
            "top5" => Ok(MarketType::Top5),
            "top10" => Ok(MarketType::Top10),
            "top20" => Ok(MarketType::Top20),
            "make_cut" => Ok(MarketType::MakeCut),
            other => Err(FairwayError::UnknownLabel {
                kind: "market type",
                value: other.to_string(),
            }),
        }
    }
}

/// Tournament lifecycle phase, recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreTournament,
    LiveRound,
    BetweenRounds,
    Finished,
    Idle,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreTournament => "PRE_TOURNAMENT",
            Phase::LiveRound => "LIVE_ROUND",
            Phase::BetweenRounds => "BETWEEN_ROUNDS",
            Phase::Finished => "FINISHED",
            Phase::Idle => "IDLE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = FairwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRE_TOURNAMENT" => Ok(Phase::PreTournament),
            "LIVE_ROUND" => Ok(Phase::LiveRound),
            "BETWEEN_ROUNDS" => Ok(Phase::BetweenRounds),
            "FINISHED" => Ok(Phase::Finished),
            "IDLE" => Ok(Phase::Idle),
            other => Err(FairwayError::UnknownLabel {
                kind: "phase",
                value: other.to_string(),
            }),
        }
    }
}

/// Verdict returned by the decision step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Bet,
    Pass,
    Watch,
}

impl Verdict {
    pub const ALL: &'static [Verdict] = &[Verdict::Bet, Verdict::Pass, Verdict::Watch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Bet => "BET",
            Verdict::Pass => "PASS",
            Verdict::Watch => "WATCH",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = FairwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BET" => Ok(Verdict::Bet),
            "PASS" => Ok(Verdict::Pass),
            "WATCH" => Ok(Verdict::Watch),
            _ => Err(FairwayError::UnknownLabel {
                kind: "verdict",
                value: s.to_string(),
            }),
        }
    }
}

/// Settled result of an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeResult {
    Win,
    Loss,
    Push,
    Pending,
}

impl OutcomeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeResult::Win => "WIN",
            OutcomeResult::Loss => "LOSS",
            OutcomeResult::Push => "PUSH",
            OutcomeResult::Pending => "PENDING",
        }
    }
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeResult {
    type Err = FairwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WIN" => Ok(OutcomeResult::Win),
            "LOSS" => Ok(OutcomeResult::Loss),
            "PUSH" => Ok(OutcomeResult::Push),
            "PENDING" => Ok(OutcomeResult::Pending),
            other => Err(FairwayError::UnknownLabel {
                kind: "outcome",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = FairwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(FairwayError::UnknownLabel {
                kind: "position status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Market feed records
// ---------------------------------------------------------------------------

/// A listed binary golf market with its current quotes (cents).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub ticker: String,
    pub event_ticker: String,
    pub title: String,
    /// Player name extracted from the market title.
    pub player_name: String,
    /// Market-type label as parsed from the listing. May be unmapped.
    pub market_type: String,
    pub yes_ask: f64,
    pub yes_bid: f64,
    pub no_ask: f64,
    pub no_bid: f64,
}

impl Market {
    /// Probability implied by the YES ask (0.0–1.0).
    pub fn implied_probability(&self) -> f64 {
        self.yes_ask / 100.0
    }

    /// YES bid/ask spread in cents.
    pub fn spread(&self) -> f64 {
        self.yes_ask - self.yes_bid
    }

    #[cfg(test)]
    pub fn sample(player: &str, market_type: MarketType, yes_ask: f64, yes_bid: f64) -> Self {
        Market {
            ticker: format!("KXPGA-TEST-{}", player.replace(' ', "").to_uppercase()),
            event_ticker: "KXPGA-TEST".to_string(),
            title: format!("Will {player} win the Test Open?"),
            player_name: player.to_string(),
            market_type: market_type.as_str().to_string(),
            yes_ask,
            yes_bid,
            no_ask: 100.0 - yes_bid,
            no_bid: 100.0 - yes_ask,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} (bid {:.0}¢ / ask {:.0}¢)",
            self.ticker, self.player_name, self.market_type, self.yes_bid, self.yes_ask,
        )
    }
}

/// Terminal status of a market as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Settled { won: bool },
}

// ---------------------------------------------------------------------------
// Model feed records
// ---------------------------------------------------------------------------

/// Model outcome probabilities for a player, in percent (0–100).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerProbabilities {
    pub win: f64,
    pub top_5: f64,
    pub top_10: f64,
    pub top_20: f64,
    pub make_cut: f64,
}

impl PlayerProbabilities {
    pub fn get(&self, market_type: MarketType) -> f64 {
        match market_type {
            MarketType::Winner => self.win,
            MarketType::Top5 => self.top_5,
            MarketType::Top10 => self.top_10,
            MarketType::Top20 => self.top_20,
            MarketType::MakeCut => self.make_cut,
        }
    }
}

/// Live leaderboard context for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Numeric position; 999 when unknown or cut.
    pub position: u32,
    pub score_to_par: i32,
    pub round: u32,
    /// Holes completed in the current round.
    pub thru: u32,
}

impl Default for LeaderboardEntry {
    fn default() -> Self {
        Self {
            position: 999,
            score_to_par: 0,
            round: 0,
            thru: 0,
        }
    }
}

/// One in-play fetch: probabilities and the leaderboard from the same payload.
#[derive(Debug, Clone, Default)]
pub struct InPlaySnapshot {
    pub tournament_name: Option<String>,
    pub probabilities: HashMap<String, PlayerProbabilities>,
    pub leaderboard: HashMap<String, LeaderboardEntry>,
}

impl InPlaySnapshot {
    /// True when no tournament is live.
    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }
}

/// Pre-tournament model output.
#[derive(Debug, Clone, Default)]
pub struct PreTournament {
    pub tournament_name: String,
    pub players: HashMap<String, PlayerProbabilities>,
}

impl PreTournament {
    pub fn has_players(&self) -> bool {
        !self.players.is_empty()
    }
}

/// Strokes-gained breakdown for a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillBreakdown {
    pub sg_ott: Option<f64>,
    pub sg_app: Option<f64>,
    pub sg_arg: Option<f64>,
    pub sg_putt: Option<f64>,
    pub sg_total: Option<f64>,
}

/// Player → {book → implied probability (0.0–1.0)}.
pub type BookOdds = HashMap<String, HashMap<String, f64>>;

// ---------------------------------------------------------------------------
// Ledger records
// ---------------------------------------------------------------------------

/// Fields of an opportunity before it is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityDraft {
    pub player_name: String,
    pub ticker: String,
    pub market_type: MarketType,
    /// Model probability (0.0–1.0).
    pub model_prob: f64,
    /// Market-implied probability (0.0–1.0).
    pub implied_prob: f64,
    pub edge_pct: f64,
    pub position: Option<u32>,
    pub score_to_par: Option<i32>,
    pub round: Option<u32>,
    pub holes_completed: Option<u32>,
    pub phase: Phase,
    pub tournament_name: Option<String>,
}

/// Immutable snapshot of a market that survived every filter.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: OpportunityDraft,
}

/// A verdict with its supporting numbers, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentVerdict {
    pub verdict: Verdict,
    /// 0.0–1.0
    pub confidence: f64,
    /// Suggested stake, percent of bankroll.
    pub stake_pct: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: i64,
    pub opportunity_id: i64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub stake_pct: f64,
    pub reasoning: String,
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub id: i64,
    pub opportunity_id: i64,
    pub result: OutcomeResult,
    pub final_position: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Fields of a pipeline position at open time.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub opportunity_id: i64,
    pub ticker: String,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    pub entry_edge: f64,
    pub tournament_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub id: i64,
    pub opportunity_id: Option<i64>,
    pub ticker: String,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    pub entry_edge: f64,
    pub entry_timestamp: DateTime<Utc>,
    pub tournament_name: Option<String>,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    pub profit: Option<f64>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} @ {:.0}¢ ({})",
            self.ticker,
            self.player_name,
            self.market_type,
            self.entry_price,
            self.status.as_str(),
        )
    }
}

/// A position entered by hand, outside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManualPosition {
    #[serde(default)]
    pub ticker: Option<String>,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualPosition {
    pub id: i64,
    pub ticker: Option<String>,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    pub quantity: u32,
    pub notes: Option<String>,
    pub entry_timestamp: DateTime<Utc>,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    /// (exit − entry) × quantity, in cents.
    pub profit: Option<f64>,
}

/// Closing-line-value row for one bet.
#[derive(Debug, Clone, Serialize)]
pub struct ClvRecord {
    pub ticker: String,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    pub closing_price: Option<f64>,
    pub clv_cents: Option<f64>,
    pub settlement_price: Option<f64>,
    pub outcome: Option<OutcomeResult>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain errors that callers branch on.
#[derive(Debug, Error)]
pub enum FairwayError {
    #[error("Rate limited by {source_name}")]
    RateLimited { source_name: String },

    #[error("Feed error ({source_name}): {message}")]
    Feed { source_name: String, message: String },

    #[error("Unknown {kind}: {value}")]
    UnknownLabel { kind: &'static str, value: String },

    #[error("Agent response error: {0}")]
    AgentResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
