//! Kelly criterion stake sizing for binary contracts.
//!
//! A YES contract bought at `price` cents pays 100 cents on a win, so the
//! net odds are `(100 − price) / price`. Sizing uses fractional Kelly with a
//! hard cap on the fraction of bankroll staked.

use serde::Serialize;
use tracing::debug;

use crate::config::SizingConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub fraction: f64,
    /// Maximum stake as a fraction of bankroll.
    pub max_stake_pct: f64,
    /// Bankroll used to express the stake in dollars.
    pub bankroll: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: 0.25,
            max_stake_pct: 0.05,
            bankroll: 1000.0,
        }
    }
}

impl KellyConfig {
    pub fn from_settings(sizing: &SizingConfig, bankroll: f64) -> Self {
        Self {
            fraction: sizing.kelly_fraction,
            max_stake_pct: sizing.max_stake_pct,
            bankroll,
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly formula
// ---------------------------------------------------------------------------

/// Fraction of bankroll to stake on YES at `price_cents` when the true
/// probability is `p`.
///
/// Kelly formula: f* = (bp − q) / b, where b = (1 − price) / price.
/// Returns 0.0 for degenerate inputs or non-positive Kelly.
pub fn kelly_stake(p: f64, price_cents: f64, fraction: f64, max_stake_pct: f64) -> f64 {
    if price_cents <= 0.0 || price_cents >= 100.0 || p <= 0.0 || p >= 1.0 {
        return 0.0;
    }

    let price = price_cents / 100.0;
    let b = (1.0 - price) / price;
    let q = 1.0 - p;
    let full_kelly = (b * p - q) / b;

    if full_kelly <= 0.0 {
        return 0.0;
    }

    (full_kelly * fraction).min(max_stake_pct)
}

// ---------------------------------------------------------------------------
// Stake recommendation
// ---------------------------------------------------------------------------

/// Sized stake plus the breakeven context the decision step sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeRecommendation {
    /// Stake as percent of bankroll, rounded to 2 places.
    pub stake_pct: f64,
    /// Stake in dollars against the configured bankroll.
    pub stake_amount: f64,
    /// Breakeven probability in percent (equals the price in cents).
    pub breakeven_pct: f64,
    /// Model probability minus breakeven, in percentage points.
    pub edge_over_breakeven: f64,
    pub is_positive_ev: bool,
}

pub struct StakeSizer {
    config: KellyConfig,
}

impl StakeSizer {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size a YES stake. `model_prob_pct` is the model probability in percent.
    pub fn recommend(&self, model_prob_pct: f64, price_cents: f64) -> StakeRecommendation {
        let p = model_prob_pct / 100.0;
        let stake = kelly_stake(p, price_cents, self.config.fraction, self.config.max_stake_pct);
        let edge_over_breakeven = model_prob_pct - price_cents;

        let rec = StakeRecommendation {
            stake_pct: round2(stake * 100.0),
            stake_amount: round2(stake * self.config.bankroll),
            breakeven_pct: price_cents,
            edge_over_breakeven: round2(edge_over_breakeven),
            is_positive_ev: edge_over_breakeven > 0.0,
        };

        debug!(
            model_prob_pct,
            price_cents,
            stake_pct = rec.stake_pct,
            stake_amount = rec.stake_amount,
            "Stake sized"
        );

        rec
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
