//! Outbound alerts: BET recommendations and exit notices.
//!
//! `AlertSink::send` reports whether the alert was delivered; a pipeline
//! position is only opened on a delivered recommendation. `CooldownSink`
//! suppresses repeat recommendations for the same ticker. Exit notices
//! are one-time events and pass straight through.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::strategy::edge::EdgeValidation;
use crate::strategy::kelly::StakeRecommendation;
use crate::types::{AgentVerdict, LeaderboardEntry, MarketType, Opportunity};

// ---------------------------------------------------------------------------
// Alert payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub opportunity: Opportunity,
    pub verdict: AgentVerdict,
    pub yes_ask: f64,
    pub yes_bid: f64,
    pub leaderboard: Option<LeaderboardEntry>,
    pub validation: EdgeValidation,
    pub stake: StakeRecommendation,
}

#[derive(Debug, Clone)]
pub struct ExitNotice {
    pub ticker: String,
    pub player_name: String,
    pub market_type: MarketType,
    pub entry_price: f64,
    pub exit_price: f64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum Alert {
    Recommendation(Box<Recommendation>),
    Exit(ExitNotice),
}

impl Alert {
    pub fn ticker(&self) -> &str {
        match self {
            Alert::Recommendation(r) => &r.opportunity.fields.ticker,
            Alert::Exit(e) => &e.ticker,
        }
    }

    /// Plain-text rendering for log or chat delivery.
    pub fn message(&self) -> String {
        let mut out = String::new();
        match self {
            Alert::Recommendation(r) => {
                let opp = &r.opportunity.fields;
                let label = opp.market_type.as_str().to_uppercase();
                let _ = writeln!(out, "{} RECOMMENDATION: {} {label}", r.verdict.verdict, opp.player_name);
                let _ = writeln!(
                    out,
                    "Model: {:.0}% | Market: {:.0}¢ ask ({:.0}¢ bid) | Spread: {:.0}¢",
                    opp.model_prob * 100.0,
                    r.yes_ask,
                    r.yes_bid,
                    r.yes_ask - r.yes_bid
                );
                let _ = writeln!(
                    out,
                    "Edge: {:+.1}% | Confidence: {:.0}% | Validation: {}",
                    opp.edge_pct,
                    r.verdict.confidence * 100.0,
                    r.validation.confidence.as_str().to_uppercase()
                );
                let _ = writeln!(
                    out,
                    "Stake: {:.2}% of bankroll (${:.2}) | Edge over breakeven: {:+.1}%",
                    r.verdict.stake_pct, r.stake.stake_amount, r.stake.edge_over_breakeven
                );
                if let Some(lb) = &r.leaderboard {
                    let _ = writeln!(
                        out,
                        "Position: {} | Score: {:+} | R{} thru {}",
                        lb.position, lb.score_to_par, lb.round, lb.thru
                    );
                }
                let _ = write!(out, "Reasoning: {}", r.verdict.reasoning);
            }
            Alert::Exit(e) => {
                let pnl = e.exit_price - e.entry_price;
                let _ = writeln!(out, "SELL: {} {}", e.player_name, e.market_type.as_str().to_uppercase());
                let _ = writeln!(out, "Entry: {:.0}¢ → Exit: {:.0}¢ ({pnl:+.0}¢)", e.entry_price, e.exit_price);
                let _ = write!(out, "Reason: {}", e.reason);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert. Returns whether it was delivered.
    async fn send(&self, alert: &Alert) -> bool;
}

/// Writes alerts to the log. Always delivers.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> bool {
        info!(ticker = alert.ticker(), "ALERT\n{}", alert.message());
        true
    }
}

/// Per-ticker cooldown in front of another sink. Only delivered
/// recommendations start a cooldown.
pub struct CooldownSink<S> {
    inner: S,
    cooldown: Duration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl<S: AlertSink> CooldownSink<S> {
    pub fn new(inner: S, cooldown_minutes: i64) -> Self {
        Self {
            inner,
            cooldown: Duration::minutes(cooldown_minutes),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn cooling_down(&self, ticker: &str, now: DateTime<Utc>) -> bool {
        match self.last_sent.lock() {
            Ok(map) => map.get(ticker).is_some_and(|t| now - *t < self.cooldown),
            Err(poisoned) => poisoned
                .into_inner()
                .get(ticker)
                .is_some_and(|t| now - *t < self.cooldown),
        }
    }

    fn mark_sent(&self, ticker: &str, now: DateTime<Utc>) {
        let mut map = match self.last_sent.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.retain(|_, sent| now - *sent < self.cooldown);
        map.insert(ticker.to_string(), now);
    }
}

#[async_trait]
impl<S: AlertSink> AlertSink for CooldownSink<S> {
    async fn send(&self, alert: &Alert) -> bool {
        if matches!(alert, Alert::Exit(_)) {
            return self.inner.send(alert).await;
        }

        let now = Utc::now();
        if self.cooling_down(alert.ticker(), now) {
            debug!(ticker = alert.ticker(), "Alert cooldown active");
            return false;
        }

        let delivered = self.inner.send(alert).await;
        if delivered {
            self.mark_sent(alert.ticker(), now);
        } else {
            warn!(ticker = alert.ticker(), "Alert not delivered");
        }
        delivered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::edge::validate_edge;
    use crate::strategy::kelly::{KellyConfig, StakeSizer};
    use crate::types::{OpportunityDraft, Phase, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        sent: Arc<AtomicUsize>,
        deliver: bool,
    }

    #[async_trait]
    impl AlertSink for Counting {
        async fn send(&self, _alert: &Alert) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.deliver
        }
    }

    fn recommendation(ticker: &str) -> Alert {
        Alert::Recommendation(Box::new(Recommendation {
            opportunity: Opportunity {
                id: 1,
                timestamp: Utc::now(),
                fields: OpportunityDraft {
                    player_name: "Scottie Scheffler".into(),
                    ticker: ticker.into(),
                    market_type: MarketType::Winner,
                    model_prob: 0.30,
                    implied_prob: 0.18,
                    edge_pct: 12.0,
                    position: Some(1),
                    score_to_par: Some(-12),
                    round: Some(4),
                    holes_completed: Some(9),
                    phase: Phase::LiveRound,
                    tournament_name: None,
                },
            },
            verdict: AgentVerdict {
                verdict: Verdict::Bet,
                confidence: 0.7,
                stake_pct: 3.66,
                reasoning: "clear edge".into(),
            },
            yes_ask: 18.0,
            yes_bid: 13.0,
            leaderboard: Some(LeaderboardEntry {
                position: 1,
                score_to_par: -12,
                round: 4,
                thru: 9,
            }),
            validation: validate_edge(0.30, 0.18, &Default::default()),
            stake: StakeSizer::new(KellyConfig::default()).recommend(30.0, 18.0),
        }))
    }

    fn exit(ticker: &str) -> Alert {
        Alert::Exit(ExitNotice {
            ticker: ticker.into(),
            player_name: "Scottie Scheffler".into(),
            market_type: MarketType::Winner,
            entry_price: 18.0,
            exit_price: 35.0,
            reason: "Profit target (+15¢)".into(),
        })
    }

    #[test]
    fn test_messages() {
        let msg = recommendation("T1").message();
        assert!(msg.starts_with("BET RECOMMENDATION: Scottie Scheffler WINNER"));
        assert!(msg.contains("18¢ ask (13¢ bid) | Spread: 5¢"));
        assert!(msg.contains("Edge: +12.0%"));
        assert!(msg.contains("R4 thru 9"));

        let msg = exit("T1").message();
        assert!(msg.contains("Entry: 18¢ → Exit: 35¢ (+17¢)"));
        assert!(msg.contains("Profit target"));
    }

    #[tokio::test]
    async fn test_log_sink_delivers() {
        assert!(LogAlertSink.send(&recommendation("T1")).await);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_repeat_recommendations() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink = CooldownSink::new(Counting { sent: sent.clone(), deliver: true }, 30);

        assert!(sink.send(&recommendation("T1")).await);
        assert!(!sink.send(&recommendation("T1")).await);
        assert!(sink.send(&recommendation("T2")).await);
        assert_eq!(sent.load(Ordering::SeqCst), 2);

        // Exits are never throttled.
        assert!(sink.send(&exit("T1")).await);
        assert!(sink.send(&exit("T1")).await);
        assert_eq!(sent.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_start_cooldown() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink = CooldownSink::new(Counting { sent: sent.clone(), deliver: false }, 30);

        assert!(!sink.send(&recommendation("T1")).await);
        assert!(!sink.send(&recommendation("T1")).await);
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_cooldowns_are_dropped() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink = CooldownSink::new(Counting { sent, deliver: true }, 30);
        let now = Utc::now();

        sink.mark_sent("OLD", now - Duration::minutes(45));
        sink.mark_sent("RECENT", now - Duration::minutes(5));
        sink.mark_sent("NEW", now);

        let mut tracked: Vec<String> = sink.last_sent.lock().unwrap().keys().cloned().collect();
        tracked.sort_unstable();
        assert_eq!(tracked, ["NEW", "RECENT"]);
        assert!(sink.cooling_down("RECENT", now));
        assert!(!sink.cooling_down("OLD", now));
    }

    #[tokio::test]
    async fn test_zero_cooldown_never_blocks() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink = CooldownSink::new(Counting { sent: sent.clone(), deliver: true }, 0);
        assert!(sink.send(&recommendation("T1")).await);
        assert!(sink.send(&recommendation("T1")).await);
    }
}
