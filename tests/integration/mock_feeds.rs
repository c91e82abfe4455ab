//! Mock collaborators for integration testing.
//!
//! Deterministic, in-memory stand-ins for the model feed, the exchange,
//! the decision agent, and the alert sink. Every one is controllable
//! from test code between cycles.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use fairway::alerts::{Alert, AlertSink};
use fairway::feeds::{MarketFeed, ModelFeed};
use fairway::llm::{DecisionAgent, OpportunityContext};
use fairway::types::*;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn market(ticker: &str, player: &str, market_type: MarketType, ask: f64, bid: f64) -> Market {
    Market {
        ticker: ticker.to_string(),
        event_ticker: "KXPGA-MOCK".to_string(),
        title: format!("Will {player} finish {market_type}?"),
        player_name: player.to_string(),
        market_type: market_type.as_str().to_string(),
        yes_ask: ask,
        yes_bid: bid,
        no_ask: 100.0 - bid,
        no_bid: 100.0 - ask,
    }
}

/// A live snapshot: (player, win %, leaderboard entry).
pub fn live_snapshot(players: &[(&str, f64, LeaderboardEntry)]) -> InPlaySnapshot {
    let mut snap = InPlaySnapshot {
        tournament_name: Some("The Mock Invitational".to_string()),
        ..Default::default()
    };
    for (name, win, lb) in players {
        snap.probabilities.insert(
            name.to_string(),
            PlayerProbabilities {
                win: *win,
                top_5: (win * 2.5).min(99.0),
                top_10: (win * 3.0).min(99.0),
                top_20: (win * 3.2).min(99.0),
                make_cut: 99.0,
            },
        );
        snap.leaderboard.insert(name.to_string(), *lb);
    }
    snap
}

pub fn on_course(position: u32, score_to_par: i32, round: u32, thru: u32) -> LeaderboardEntry {
    LeaderboardEntry {
        position,
        score_to_par,
        round,
        thru,
    }
}

// ---------------------------------------------------------------------------
// Model feed
// ---------------------------------------------------------------------------

pub struct MockModelFeed {
    in_play: Mutex<Option<InPlaySnapshot>>,
    pre_tournament: Mutex<PreTournament>,
    book_odds: Mutex<BookOdds>,
}

impl MockModelFeed {
    pub fn live(snapshot: InPlaySnapshot) -> Self {
        Self {
            in_play: Mutex::new(Some(snapshot)),
            pre_tournament: Mutex::new(PreTournament::default()),
            book_odds: Mutex::new(BookOdds::new()),
        }
    }

    /// Every in-play fetch fails.
    pub fn offline() -> Self {
        Self {
            in_play: Mutex::new(None),
            pre_tournament: Mutex::new(PreTournament::default()),
            book_odds: Mutex::new(BookOdds::new()),
        }
    }

    pub fn set_in_play(&self, snapshot: Option<InPlaySnapshot>) {
        *self.in_play.lock().unwrap() = snapshot;
    }

    /// Change one player's win probability (percent).
    pub fn set_win(&self, player: &str, win: f64) {
        if let Some(snap) = self.in_play.lock().unwrap().as_mut() {
            if let Some(probs) = snap.probabilities.get_mut(player) {
                probs.win = win;
            }
        }
    }

    pub fn set_book_odds(&self, player: &str, books: &[(&str, f64)]) {
        let odds = books.iter().map(|(b, p)| (b.to_string(), *p)).collect();
        self.book_odds.lock().unwrap().insert(player.to_string(), odds);
    }
}

#[async_trait]
impl ModelFeed for MockModelFeed {
    async fn in_play(&self) -> Result<InPlaySnapshot> {
        self.in_play
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("mock model feed offline"))
    }

    async fn pre_tournament(&self) -> Result<PreTournament> {
        Ok(self.pre_tournament.lock().unwrap().clone())
    }

    async fn book_odds(&self, _market_type: MarketType) -> Result<BookOdds> {
        Ok(self.book_odds.lock().unwrap().clone())
    }

    async fn skill_breakdown(&self) -> Result<HashMap<String, SkillBreakdown>> {
        Ok(HashMap::new())
    }

    fn name(&self) -> &str {
        "mock-model"
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum StatusReply {
    Open,
    Settled { won: bool },
    Fail(String),
}

pub struct MockMarketFeed {
    markets: Mutex<Vec<Market>>,
    discover_error: Mutex<Option<String>>,
    statuses: Mutex<HashMap<String, StatusReply>>,
    status_calls: AtomicUsize,
}

impl MockMarketFeed {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets: Mutex::new(markets),
            discover_error: Mutex::new(None),
            statuses: Mutex::new(HashMap::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.lock().unwrap() = markets;
    }

    /// Move a listed market's quotes; order-book refreshes follow.
    pub fn set_quotes(&self, ticker: &str, ask: f64, bid: f64) {
        for m in self.markets.lock().unwrap().iter_mut() {
            if m.ticker == ticker {
                m.yes_ask = ask;
                m.yes_bid = bid;
                m.no_ask = 100.0 - bid;
                m.no_bid = 100.0 - ask;
            }
        }
    }

    pub fn fail_discovery(&self, message: &str) {
        *self.discover_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_status(&self, ticker: &str, reply: StatusReply) {
        self.statuses.lock().unwrap().insert(ticker.to_string(), reply);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketFeed for MockMarketFeed {
    async fn discover_markets(&self) -> Result<Vec<Market>> {
        if let Some(msg) = self.discover_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn refresh_prices(&self, market: &mut Market) -> Result<()> {
        let markets = self.markets.lock().unwrap();
        let listed = markets
            .iter()
            .find(|m| m.ticker == market.ticker)
            .ok_or_else(|| anyhow!("no order book for {}", market.ticker))?;
        market.yes_ask = listed.yes_ask;
        market.yes_bid = listed.yes_bid;
        market.no_ask = listed.no_ask;
        market.no_bid = listed.no_bid;
        Ok(())
    }

    async fn market_status(&self, ticker: &str) -> Result<MarketStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.statuses.lock().unwrap().get(ticker).cloned();
        match reply.unwrap_or(StatusReply::Open) {
            StatusReply::Open => Ok(MarketStatus::Open),
            StatusReply::Settled { won } => Ok(MarketStatus::Settled { won }),
            StatusReply::Fail(msg) => Err(anyhow!(msg)),
        }
    }

    fn name(&self) -> &str {
        "mock-exchange"
    }
}

// ---------------------------------------------------------------------------
// Decision agent
// ---------------------------------------------------------------------------

pub struct ScriptedAgent {
    reply: Mutex<std::result::Result<AgentVerdict, String>>,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    pub fn answering(verdict: Verdict, stake_pct: f64) -> Self {
        Self {
            reply: Mutex::new(Ok(AgentVerdict {
                verdict,
                confidence: 0.72,
                stake_pct,
                reasoning: "scripted".to_string(),
            })),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionAgent for ScriptedAgent {
    async fn evaluate(&self, _context: &OpportunityContext) -> Result<AgentVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

// ---------------------------------------------------------------------------
// Alert sink
// ---------------------------------------------------------------------------

pub struct RecordingSink {
    deliver: AtomicBool,
    sent: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn delivering(deliver: bool) -> Self {
        Self {
            deliver: AtomicBool::new(deliver),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn recommendations(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|a| matches!(a, Alert::Recommendation(_)))
            .count()
    }

    pub fn exit_messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|a| matches!(a, Alert::Exit(_)))
            .map(|a| a.message())
            .collect()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> bool {
        self.sent.lock().unwrap().push(alert.clone());
        self.deliver.load(Ordering::SeqCst)
    }
}
