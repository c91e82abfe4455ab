//! External data feeds: the probability model and the exchange.
//!
//! Defines the `ModelFeed` and `MarketFeed` traits, the per-cycle cache
//! that sits in front of the model's optional endpoints, and the name
//! normalisation shared by the concrete clients.

pub mod datagolf;
pub mod kalshi;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{
    BookOdds, InPlaySnapshot, Market, MarketStatus, MarketType, PreTournament, SkillBreakdown,
};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Source of model probabilities and tournament context.
#[async_trait]
pub trait ModelFeed: Send + Sync {
    /// Live probabilities and leaderboard from one in-play fetch.
    /// Empty probabilities mean no tournament is live.
    async fn in_play(&self) -> Result<InPlaySnapshot>;

    /// Pre-tournament model output for the next event.
    async fn pre_tournament(&self) -> Result<PreTournament>;

    /// Sportsbook implied probabilities for one market type.
    async fn book_odds(&self, market_type: MarketType) -> Result<BookOdds>;

    /// Strokes-gained breakdown for the field.
    async fn skill_breakdown(&self) -> Result<HashMap<String, SkillBreakdown>>;

    /// Feed identifier for logs.
    fn name(&self) -> &str;
}

/// Source of listed markets, quotes, and settlement status.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// All open golf markets with a live YES ask.
    async fn discover_markets(&self) -> Result<Vec<Market>>;

    /// Re-derive a market's quotes from its order book.
    async fn refresh_prices(&self, market: &mut Market) -> Result<()>;

    /// Current lifecycle status of a market.
    async fn market_status(&self, ticker: &str) -> Result<MarketStatus>;

    /// Feed identifier for logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Per-cycle cache
// ---------------------------------------------------------------------------

/// Lazily fetched, cycle-scoped data. Create one at the start of each cycle
/// and drop it at the end; nothing here survives into the next cycle.
///
/// Failed fetches are cached as empty so an outage costs one call per
/// cycle, not one per market.
#[derive(Default)]
pub struct CycleContext {
    book_odds: HashMap<MarketType, BookOdds>,
    skills: Option<HashMap<String, SkillBreakdown>>,
}

impl CycleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book probabilities for one player in one market type.
    pub async fn book_odds_for(
        &mut self,
        feed: &dyn ModelFeed,
        market_type: MarketType,
        player: &str,
    ) -> HashMap<String, f64> {
        if !self.book_odds.contains_key(&market_type) {
            let odds = match feed.book_odds(market_type).await {
                Ok(odds) => odds,
                Err(e) => {
                    warn!(feed = feed.name(), market_type = %market_type, error = %e, "Book odds unavailable");
                    BookOdds::new()
                }
            };
            debug!(market_type = %market_type, players = odds.len(), "Book odds cached");
            self.book_odds.insert(market_type, odds);
        }

        self.book_odds
            .get(&market_type)
            .and_then(|odds| odds.get(player))
            .cloned()
            .unwrap_or_default()
    }

    /// Skill breakdown for one player, if the feed has it.
    pub async fn skill_for(&mut self, feed: &dyn ModelFeed, player: &str) -> Option<SkillBreakdown> {
        if self.skills.is_none() {
            let skills = match feed.skill_breakdown().await {
                Ok(skills) => skills,
                Err(e) => {
                    warn!(feed = feed.name(), error = %e, "Skill breakdown unavailable");
                    HashMap::new()
                }
            };
            self.skills = Some(skills);
        }

        self.skills.as_ref().and_then(|s| s.get(player)).copied()
    }
}

// ---------------------------------------------------------------------------
// Name normalisation
// ---------------------------------------------------------------------------

/// Convert "Last, First" to "First Last". Other forms are trimmed only.
pub fn normalize_player_name(raw: &str) -> String {
    match raw.split_once(',') {
        Some((last, first)) if !first.trim().is_empty() => {
            format!("{} {}", first.trim(), last.trim())
        }
        _ => raw.trim().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
