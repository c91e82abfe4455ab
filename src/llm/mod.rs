//! Decision step: turns a packaged opportunity into BET / PASS / WATCH.
//!
//! Defines the `DecisionAgent` trait, the context handed to it, and the
//! deterministic fallback used whenever the agent cannot be reached or
//! its answer cannot be parsed.

pub mod anthropic;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::storage::stats::{AccuracyStats, BetHistoryEntry};
use crate::strategy::edge::EdgeValidation;
use crate::strategy::kelly::StakeRecommendation;
use crate::types::{AgentVerdict, LeaderboardEntry, Opportunity, SkillBreakdown, Verdict};

/// Edge (points, either sign) at which the fallback still recommends a bet.
pub const FALLBACK_BET_EDGE: f64 = 15.0;

/// How the ledger says past calls have gone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackRecord {
    pub overall: AccuracyStats,
    pub market_type: AccuracyStats,
    /// BETs taken at 10+ points of edge.
    pub large_edge: AccuracyStats,
    /// Most recent BETs on the same market type, newest first.
    pub recent_bets: Vec<BetHistoryEntry>,
}

/// Everything the agent sees about one opportunity.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityContext {
    pub opportunity: Opportunity,
    pub leaderboard: Option<LeaderboardEntry>,
    pub validation: EdgeValidation,
    pub stake: StakeRecommendation,
    pub skill: Option<SkillBreakdown>,
    pub track_record: TrackRecord,
}

/// Opaque decision maker. Errors mean "no usable verdict"; callers fall
/// back to [`fallback_verdict`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionAgent: Send + Sync {
    async fn evaluate(&self, context: &OpportunityContext) -> Result<AgentVerdict>;
}

/// Stand-in when no agent is configured. Every call fails, so every
/// opportunity gets the fallback verdict.
#[derive(Debug, Default)]
pub struct UnavailableAgent;

#[async_trait]
impl DecisionAgent for UnavailableAgent {
    async fn evaluate(&self, _context: &OpportunityContext) -> Result<AgentVerdict> {
        Err(anyhow!("No decision agent configured"))
    }
}

/// Deterministic verdict used when the agent is unavailable.
pub fn fallback_verdict(edge_pct: f64) -> AgentVerdict {
    if edge_pct.abs() >= FALLBACK_BET_EDGE {
        AgentVerdict {
            verdict: Verdict::Bet,
            confidence: 0.5,
            stake_pct: 1.0,
            reasoning: format!(
                "Fallback: {edge_pct:+.1}% edge exceeds {FALLBACK_BET_EDGE:.0}% threshold. Agent unavailable."
            ),
        }
    } else {
        AgentVerdict {
            verdict: Verdict::Watch,
            confidence: 0.3,
            stake_pct: 0.0,
            reasoning: format!("Fallback: {edge_pct:+.1}% edge. Agent unavailable, defaulting to WATCH."),
        }
    }
}

/// A positive-EV Kelly stake replaces the agent's own suggestion.
pub fn apply_kelly_override(mut verdict: AgentVerdict, stake: &StakeRecommendation) -> AgentVerdict {
    if stake.is_positive_ev {
        verdict.stake_pct = stake.stake_pct;
    }
    verdict
}
