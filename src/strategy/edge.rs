//! Edge computation, round-adjusted thresholds, and multi-source validation.
//!
//! The primary edge compares the model against the exchange price. The
//! validator cross-checks it against sportsbook odds, with one sharp book
//! acting as the reference.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Book whose line is treated as the sharp reference.
pub const REFERENCE_BOOK: &str = "pinnacle";

/// Reference-book edge (points) needed, with a strong exchange edge, for a
/// high-confidence tier.
const HIGH_CONFIDENCE_REFERENCE_EDGE: f64 = 3.0;
const HIGH_CONFIDENCE_MARKET_EDGE: f64 = 8.0;

/// Later rounds carry more information, so the multiplier rises and the
/// required edge falls with the round.
pub fn round_multiplier(round: u32) -> f64 {
    match round {
        1 => 0.70,
        2 => 0.85,
        3 => 1.00,
        4 => 1.15,
        _ => 1.0,
    }
}

/// Minimum edge (percentage points) required in a given round.
pub fn min_edge_for_round(base_min_edge: f64, round: u32) -> f64 {
    base_min_edge / round_multiplier(round)
}

/// Edge in percentage points. Probabilities are 0.0–1.0.
pub fn edge_pct(model_prob: f64, implied_prob: f64) -> f64 {
    (model_prob - implied_prob) * 100.0
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationConfidence {
    High,
    Medium,
    Low,
}

impl ValidationConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationConfidence::High => "high",
            ValidationConfidence::Medium => "medium",
            ValidationConfidence::Low => "low",
        }
    }
}

/// Result of cross-checking an edge against sportsbooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeValidation {
    pub edge_vs_market: f64,
    pub edge_vs_reference: Option<f64>,
    pub reference_prob: Option<f64>,
    pub consensus_prob: Option<f64>,
    pub edge_vs_consensus: Option<f64>,
    pub books_available: usize,
    pub confidence: ValidationConfidence,
}

/// Cross-check a model probability against market and sportsbook prices.
///
/// `book_probs` maps book name to implied probability (0.0–1.0). The
/// consensus only averages strictly positive book probabilities.
pub fn validate_edge(
    model_prob: f64,
    market_implied: f64,
    book_probs: &HashMap<String, f64>,
) -> EdgeValidation {
    let edge_vs_market = edge_pct(model_prob, market_implied);

    let reference_prob = book_probs.get(REFERENCE_BOOK).copied();
    let edge_vs_reference = reference_prob.map(|p| edge_pct(model_prob, p));

    let positive: Vec<f64> = book_probs.values().copied().filter(|p| *p > 0.0).collect();
    let consensus_prob = if positive.is_empty() {
        None
    } else {
        Some(positive.iter().sum::<f64>() / positive.len() as f64)
    };
    let edge_vs_consensus = consensus_prob.map(|p| edge_pct(model_prob, p));

    let confidence = if book_probs.is_empty() {
        ValidationConfidence::Medium
    } else if edge_vs_reference.is_some_and(|e| e >= HIGH_CONFIDENCE_REFERENCE_EDGE)
        && edge_vs_market >= HIGH_CONFIDENCE_MARKET_EDGE
    {
        ValidationConfidence::High
    } else if edge_vs_reference.is_some_and(|e| e < 0.0) {
        ValidationConfidence::Low
    } else if edge_vs_consensus.is_some_and(|e| e < 0.0) {
        ValidationConfidence::Low
    } else {
        ValidationConfidence::Medium
    };

    debug!(
        edge_vs_market,
        edge_vs_reference = ?edge_vs_reference,
        edge_vs_consensus = ?edge_vs_consensus,
        books = book_probs.len(),
        confidence = confidence.as_str(),
        "Edge validated"
    );

    EdgeValidation {
        edge_vs_market,
        edge_vs_reference,
        reference_prob,
        consensus_prob,
        edge_vs_consensus,
        books_available: book_probs.len(),
        confidence,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
