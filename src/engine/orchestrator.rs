//! Cycle orchestrator.
//!
//! One cycle: fetch the model snapshot, detect the phase, discover
//! markets, scan, monitor open positions for exits, refresh CLV closing
//! prices, and reconcile settlement. Every cycle ends in an immutable
//! [`CycleSnapshot`] published on a watch channel; a failed cycle yields
//! an IDLE snapshot and the retry interval instead of stopping the loop.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use super::scanner::{OpportunityScanner, ScanReport};
use super::Services;
use crate::alerts::{Alert, ExitNotice};
use crate::config::{AppConfig, PollingConfig};
use crate::feeds::CycleContext;
use crate::storage::{ExitRules, SettlementReport};
use crate::strategy::edge::edge_pct;
use crate::strategy::kelly::{KellyConfig, StakeSizer};
use crate::strategy::matching::closest_match;
use crate::strategy::phase::detect_phase;
use crate::types::{InPlaySnapshot, Market, MarketType, Phase, Position};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A position closed early this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ExitRecord {
    pub ticker: String,
    pub player_name: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub reason: String,
    pub alerted: bool,
}

/// Immutable result of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSnapshot {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub tournament_name: Option<String>,
    pub round_num: u32,
    pub players_loaded: usize,
    pub markets_found: usize,
    pub scan: ScanReport,
    pub exits: Vec<ExitRecord>,
    pub settlement: SettlementReport,
    pub manual_settlement: SettlementReport,
    pub next_poll_secs: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl CycleSnapshot {
    /// Placeholder published before the first cycle completes.
    pub fn starting() -> Self {
        Self::idle(0, Duration::ZERO)
    }

    fn idle(cycle: u64, next_poll: Duration) -> Self {
        Self {
            cycle,
            timestamp: Utc::now(),
            phase: Phase::Idle,
            tournament_name: None,
            round_num: 0,
            players_loaded: 0,
            markets_found: 0,
            scan: ScanReport::default(),
            exits: Vec::new(),
            settlement: SettlementReport::default(),
            manual_settlement: SettlementReport::default(),
            next_poll_secs: next_poll.as_secs(),
            duration_ms: 0,
            error: None,
        }
    }

    fn failed(cycle: u64, error: &anyhow::Error, next_poll: Duration) -> Self {
        Self {
            error: Some(format!("{error:#}")),
            ..Self::idle(cycle, next_poll)
        }
    }

    pub fn next_poll(&self) -> Duration {
        Duration::from_secs(self.next_poll_secs)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    services: Services,
    scanner: OpportunityScanner,
    polling: PollingConfig,
    exit_rules: ExitRules,
    name_cutoff: f64,
    cycle: u64,
    snapshots: watch::Sender<Arc<CycleSnapshot>>,
    scan_now: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(config: &AppConfig, services: Services) -> Self {
        let sizer = StakeSizer::new(KellyConfig::from_settings(
            &config.sizing,
            config.agent.bankroll,
        ));
        let scanner = OpportunityScanner::new(config.scanner.clone(), sizer, services.clone());
        let (snapshots, _) = watch::channel(Arc::new(CycleSnapshot::starting()));

        Self {
            services,
            scanner,
            polling: config.polling.clone(),
            exit_rules: ExitRules::from(&config.exits),
            name_cutoff: config.scanner.name_match_cutoff,
            cycle: 0,
            snapshots,
            scan_now: Arc::new(Notify::new()),
        }
    }

    /// Receiver of the latest cycle snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CycleSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Handle that cuts the current sleep short.
    pub fn scan_now_handle(&self) -> Arc<Notify> {
        self.scan_now.clone()
    }

    /// Run one cycle and publish its snapshot. Never fails.
    pub async fn run_cycle(&mut self) -> Arc<CycleSnapshot> {
        self.cycle += 1;
        let started = Instant::now();
        info!(cycle = self.cycle, "Starting cycle");

        let mut snapshot = match self.try_cycle().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(cycle = self.cycle, error = %format!("{e:#}"), "Cycle failed, continuing to next");
                CycleSnapshot::failed(self.cycle, &e, self.polling.retry_interval())
            }
        };
        snapshot.duration_ms = started.elapsed().as_millis() as u64;
        log_snapshot(&snapshot);

        let snapshot = Arc::new(snapshot);
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    /// Cycle forever, sleeping the phase interval between cycles, until
    /// `shutdown` resolves. A cycle in flight always runs to completion.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let scan_now = self.scan_now.clone();

        loop {
            let snapshot = self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(snapshot.next_poll()) => {}
                _ = scan_now.notified() => {
                    info!("Scan requested, starting cycle early");
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }
    }

    async fn try_cycle(&mut self) -> Result<CycleSnapshot> {
        let model = self.services.model.clone();
        let market_feed = self.services.market.clone();
        let ledger = self.services.ledger.clone();
        let mut ctx = CycleContext::new();

        // 1. Model snapshot and phase
        let in_play = match model.in_play().await {
            Ok(snap) => snap,
            Err(e) => {
                warn!(feed = model.name(), error = %e, "Live model data unavailable");
                InPlaySnapshot::default()
            }
        };
        let pre = if in_play.is_empty() {
            match model.pre_tournament().await {
                Ok(pre) => Some(pre),
                Err(e) => {
                    warn!(feed = model.name(), error = %e, "Pre-tournament data unavailable");
                    None
                }
            }
        } else {
            None
        };
        let state = detect_phase(&in_play, pre.as_ref());
        info!(
            phase = %state.phase,
            tournament = ?state.tournament_name,
            round = state.round_num,
            players = in_play.probabilities.len(),
            "Phase detected"
        );

        // 2. Market discovery, only when there is something to price or monitor
        let monitoring = !ledger.open_positions().await?.is_empty()
            || ledger
                .open_manual_positions()
                .await?
                .iter()
                .any(|p| p.ticker.is_some());
        let mut markets = if !in_play.is_empty() || monitoring {
            match market_feed.discover_markets().await {
                Ok(markets) => markets,
                Err(e) => {
                    warn!(feed = market_feed.name(), error = %e, "Market discovery failed");
                    Vec::new()
                }
            }
        } else {
            debug!("Nothing live and nothing open, skipping discovery");
            Vec::new()
        };
        let markets_found = markets.len();

        // 3. Scan whatever the model currently prices
        let scan = if !in_play.is_empty() && !markets.is_empty() {
            self.scanner
                .scan(&mut markets, &in_play, &state, &mut ctx)
                .await?
        } else {
            debug!(phase = %state.phase, "No live probabilities or markets, not scanning");
            ScanReport {
                markets: markets_found,
                ..Default::default()
            }
        };

        // 4. Exits and closing prices on the quotes already in hand
        let exits = self.monitor_positions(&markets, &in_play).await?;

        // 5. Settlement for anything no longer listed
        let listed: HashSet<String> = markets.iter().map(|m| m.ticker.clone()).collect();
        let settlement = if monitoring {
            ledger.reconcile_settlement(market_feed.as_ref(), &listed).await?
        } else {
            SettlementReport::default()
        };
        let manual_settlement = if monitoring {
            ledger
                .reconcile_manual_settlement(market_feed.as_ref(), &listed)
                .await?
        } else {
            SettlementReport::default()
        };

        Ok(CycleSnapshot {
            cycle: self.cycle,
            timestamp: Utc::now(),
            phase: state.phase,
            tournament_name: state.tournament_name,
            round_num: state.round_num,
            players_loaded: in_play.probabilities.len(),
            markets_found,
            scan,
            exits,
            settlement,
            manual_settlement,
            next_poll_secs: self.polling.interval_for(state.phase).as_secs(),
            duration_ms: 0,
            error: None,
        })
    }

    /// Update CLV closing prices for listed positions and close winner
    /// positions whose exit rule fires.
    async fn monitor_positions(
        &self,
        markets: &[Market],
        in_play: &InPlaySnapshot,
    ) -> Result<Vec<ExitRecord>> {
        let ledger = &self.services.ledger;
        let by_ticker: HashMap<&str, &Market> =
            markets.iter().map(|m| (m.ticker.as_str(), m)).collect();
        let mut exits = Vec::new();

        for position in ledger.open_positions().await? {
            let Some(market) = by_ticker.get(position.ticker.as_str()) else {
                continue;
            };
            ledger
                .update_closing_price(&position.ticker, market.yes_bid)
                .await?;

            if position.market_type != MarketType::Winner {
                continue;
            }

            let edge = self.current_edge(&position, market, in_play);
            let Some(reason) = ledger
                .check_exit(&position.ticker, market.yes_bid, edge, &self.exit_rules)
                .await?
            else {
                continue;
            };

            let alerted = self
                .services
                .alerts
                .send(&Alert::Exit(ExitNotice {
                    ticker: position.ticker.clone(),
                    player_name: position.player_name.clone(),
                    market_type: position.market_type,
                    entry_price: position.entry_price,
                    exit_price: market.yes_bid,
                    reason: reason.to_string(),
                }))
                .await;
            ledger.close_position(&position.ticker, market.yes_bid).await?;
            info!(
                ticker = %position.ticker,
                player = %position.player_name,
                entry = position.entry_price,
                exit = market.yes_bid,
                reason = %reason,
                "Position exited"
            );

            exits.push(ExitRecord {
                ticker: position.ticker,
                player_name: position.player_name,
                entry_price: position.entry_price,
                exit_price: market.yes_bid,
                reason: reason.to_string(),
                alerted,
            });
        }

        Ok(exits)
    }

    /// Edge recomputed from this cycle's model data. A player the model no
    /// longer lists counts as zero edge.
    fn current_edge(&self, position: &Position, market: &Market, in_play: &InPlaySnapshot) -> f64 {
        let implied = market.implied_probability();
        if implied <= 0.0 {
            return 0.0;
        }
        closest_match(&position.player_name, in_play.probabilities.keys(), self.name_cutoff)
            .and_then(|name| in_play.probabilities.get(name))
            .map(|p| edge_pct(p.get(position.market_type) / 100.0, implied))
            .unwrap_or(0.0)
    }
}

fn log_snapshot(snapshot: &CycleSnapshot) {
    info!(
        cycle = snapshot.cycle,
        phase = %snapshot.phase,
        players = snapshot.players_loaded,
        markets = snapshot.markets_found,
        evaluated = snapshot.scan.evaluations.len(),
        alerts = snapshot.scan.alerts_sent,
        opened = snapshot.scan.positions_opened,
        exits = snapshot.exits.len(),
        settled = snapshot.settlement.settled + snapshot.manual_settlement.settled,
        next_poll_secs = snapshot.next_poll_secs,
        duration_ms = snapshot.duration_ms,
        "Cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
