//! Opportunity scanner.
//!
//! For every discovered market: match the player to the model, screen the
//! quotes (round-adjusted edge, spread, stale price), refresh from the
//! order book and screen again, then validate, size, persist, and hand the
//! packaged opportunity to the decision agent. A delivered BET alert opens
//! a position and starts CLV tracking.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::Services;
use crate::alerts::{Alert, Recommendation};
use crate::config::ScannerConfig;
use crate::feeds::CycleContext;
use crate::llm::{apply_kelly_override, fallback_verdict, OpportunityContext, TrackRecord};
use crate::storage::stats::BetHistoryFilter;
use crate::storage::OpenOutcome;
use crate::strategy::edge::{edge_pct, min_edge_for_round, validate_edge, ValidationConfidence};
use crate::strategy::kelly::StakeSizer;
use crate::strategy::matching::closest_match;
use crate::strategy::phase::TournamentState;
use crate::types::{
    AgentVerdict, InPlaySnapshot, LeaderboardEntry, Market, MarketType, NewPosition,
    OpportunityDraft, PlayerProbabilities, Verdict,
};

/// Placement markets quoted below this ask late in the event are treated
/// as stale when the player already sits inside the payout places.
const STALE_ASK_CENTS: f64 = 70.0;

/// Earliest round at which the stale-price heuristic applies.
const STALE_MIN_ROUND: u32 = 3;

/// Edge (points) that counts as a "large edge" bet in the track record.
const LARGE_EDGE: f64 = 10.0;

/// Recent same-type BETs shown to the agent.
const RECENT_BETS: i64 = 5;

// ---------------------------------------------------------------------------
// Screening
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EdgeTooLow,
    SpreadTooWide,
    StalePrice,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EdgeTooLow => "edge_too_low",
            SkipReason::SpreadTooWide => "spread_too_wide",
            SkipReason::StalePrice => "stale_price",
        }
    }
}

/// Result of screening one market's quotes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen {
    /// Dropped without a record (no implied price, or a non-positive edge
    /// under the threshold).
    Ignored,
    Skipped { reason: SkipReason, edge_pct: f64 },
    Passed { edge_pct: f64 },
}

/// Screen a market's current quotes against the model probability.
pub fn screen_quotes(
    market: &Market,
    model_prob: f64,
    market_type: MarketType,
    leaderboard: Option<&LeaderboardEntry>,
    min_edge: f64,
    max_spread: f64,
) -> Screen {
    let implied = market.implied_probability();
    if implied <= 0.0 {
        return Screen::Ignored;
    }

    let edge_pct = edge_pct(model_prob, implied);
    if edge_pct < min_edge {
        if edge_pct > 0.0 {
            return Screen::Skipped {
                reason: SkipReason::EdgeTooLow,
                edge_pct,
            };
        }
        return Screen::Ignored;
    }

    if market.spread() > max_spread {
        return Screen::Skipped {
            reason: SkipReason::SpreadTooWide,
            edge_pct,
        };
    }

    // Known heuristic: a player inside the payout places late in the event
    // should not be quoted this cheaply; the resting order is likely stale.
    if let (Some(lb), Some(threshold)) = (leaderboard, market_type.qualification_threshold()) {
        if lb.round >= STALE_MIN_ROUND && lb.position <= threshold && market.yes_ask < STALE_ASK_CENTS
        {
            return Screen::Skipped {
                reason: SkipReason::StalePrice,
                edge_pct,
            };
        }
    }

    Screen::Passed { edge_pct }
}

/// A market resolved to a model player and probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched<'a> {
    pub player: &'a str,
    pub market_type: MarketType,
    /// Model probability (0.0–1.0).
    pub model_prob: f64,
}

/// Resolve a market to a model player. Name misses, unmapped market types,
/// and zero model probabilities are all silent.
pub fn match_market<'a>(
    market: &Market,
    probabilities: &'a HashMap<String, PlayerProbabilities>,
    cutoff: f64,
) -> Option<Matched<'a>> {
    let Some(player) = closest_match(&market.player_name, probabilities.keys(), cutoff) else {
        debug!(ticker = %market.ticker, player = %market.player_name, "No model match");
        return None;
    };

    let Ok(market_type) = market.market_type.parse::<MarketType>() else {
        debug!(ticker = %market.ticker, market_type = %market.market_type, "Unmapped market type");
        return None;
    };

    let pct = probabilities.get(player).map(|p| p.get(market_type)).unwrap_or(0.0);
    if pct <= 0.0 {
        return None;
    }

    Some(Matched {
        player,
        market_type,
        model_prob: pct / 100.0,
    })
}

// ---------------------------------------------------------------------------
// Scan report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SkipRecord {
    pub player_name: String,
    pub ticker: String,
    pub market_type: MarketType,
    pub reason: SkipReason,
    pub edge_pct: f64,
    pub spread: f64,
}

/// One market that reached the decision step.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub opportunity_id: i64,
    pub player_name: String,
    pub ticker: String,
    pub market_type: MarketType,
    pub model_prob: f64,
    pub implied_prob: f64,
    pub edge_pct: f64,
    pub yes_ask: f64,
    pub yes_bid: f64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub stake_pct: f64,
    pub reasoning: String,
    pub validation: ValidationConfidence,
    pub alerted: bool,
    pub position_opened: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub markets: usize,
    pub matched: usize,
    pub min_edge: f64,
    pub evaluations: Vec<Evaluation>,
    pub skipped: Vec<SkipRecord>,
    pub alerts_sent: usize,
    pub positions_opened: usize,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct OpportunityScanner {
    config: ScannerConfig,
    sizer: StakeSizer,
    services: Services,
}

impl OpportunityScanner {
    pub fn new(config: ScannerConfig, sizer: StakeSizer, services: Services) -> Self {
        Self {
            config,
            sizer,
            services,
        }
    }

    /// Scan every market. Quotes of surviving markets are refreshed in place.
    pub async fn scan(
        &self,
        markets: &mut [Market],
        in_play: &InPlaySnapshot,
        state: &TournamentState,
        ctx: &mut CycleContext,
    ) -> Result<ScanReport> {
        let min_edge = min_edge_for_round(self.config.base_min_edge, state.round_num);
        info!(
            round = state.round_num,
            min_edge = format!("{min_edge:.1}"),
            markets = markets.len(),
            "Scanning markets"
        );

        let mut report = ScanReport {
            markets: markets.len(),
            min_edge,
            ..Default::default()
        };

        for market in markets.iter_mut() {
            let Some(matched) =
                match_market(market, &in_play.probabilities, self.config.name_match_cutoff)
            else {
                continue;
            };
            report.matched += 1;

            let leaderboard = closest_match(
                matched.player,
                in_play.leaderboard.keys(),
                self.config.name_match_cutoff,
            )
            .and_then(|name| in_play.leaderboard.get(name))
            .copied();

            let Some(mut edge) = self.screen(market, &matched, leaderboard.as_ref(), min_edge, &mut report)
            else {
                continue;
            };

            match self.services.market.refresh_prices(market).await {
                Ok(()) => {
                    match self.screen(market, &matched, leaderboard.as_ref(), min_edge, &mut report) {
                        Some(fresh) => edge = fresh,
                        None => continue,
                    }
                }
                Err(e) => {
                    warn!(ticker = %market.ticker, error = %e, "Quote refresh failed, using listed quotes");
                }
            }

            let evaluation = self
                .evaluate(market, &matched, leaderboard, edge, state, ctx)
                .await?;
            if evaluation.alerted {
                report.alerts_sent += 1;
            }
            if evaluation.position_opened {
                report.positions_opened += 1;
            }
            report.evaluations.push(evaluation);
        }

        info!(
            matched = report.matched,
            evaluated = report.evaluations.len(),
            skipped = report.skipped.len(),
            alerts = report.alerts_sent,
            opened = report.positions_opened,
            "Scan complete"
        );
        Ok(report)
    }

    fn screen(
        &self,
        market: &Market,
        matched: &Matched<'_>,
        leaderboard: Option<&LeaderboardEntry>,
        min_edge: f64,
        report: &mut ScanReport,
    ) -> Option<f64> {
        match screen_quotes(
            market,
            matched.model_prob,
            matched.market_type,
            leaderboard,
            min_edge,
            self.config.max_spread_cents,
        ) {
            Screen::Passed { edge_pct } => Some(edge_pct),
            Screen::Ignored => None,
            Screen::Skipped { reason, edge_pct } => {
                info!(
                    player = matched.player,
                    ticker = %market.ticker,
                    reason = reason.as_str(),
                    edge = format!("{edge_pct:+.1}"),
                    ask = market.yes_ask,
                    bid = market.yes_bid,
                    "Market skipped"
                );
                report.skipped.push(SkipRecord {
                    player_name: matched.player.to_string(),
                    ticker: market.ticker.clone(),
                    market_type: matched.market_type,
                    reason,
                    edge_pct,
                    spread: market.spread(),
                });
                None
            }
        }
    }

    async fn evaluate(
        &self,
        market: &Market,
        matched: &Matched<'_>,
        leaderboard: Option<LeaderboardEntry>,
        edge_pct: f64,
        state: &TournamentState,
        ctx: &mut CycleContext,
    ) -> Result<Evaluation> {
        let model = self.services.model.as_ref();
        let ledger = &self.services.ledger;
        let implied = market.implied_probability();

        let books = ctx.book_odds_for(model, matched.market_type, matched.player).await;
        let validation = validate_edge(matched.model_prob, implied, &books);
        let stake = self.sizer.recommend(matched.model_prob * 100.0, market.yes_ask);
        let skill = ctx.skill_for(model, matched.player).await;

        let opportunity = ledger
            .record_opportunity(&OpportunityDraft {
                player_name: matched.player.to_string(),
                ticker: market.ticker.clone(),
                market_type: matched.market_type,
                model_prob: matched.model_prob,
                implied_prob: implied,
                edge_pct,
                position: leaderboard.map(|lb| lb.position),
                score_to_par: leaderboard.map(|lb| lb.score_to_par),
                round: leaderboard.map(|lb| lb.round),
                holes_completed: leaderboard.map(|lb| lb.thru),
                phase: state.phase,
                tournament_name: state.tournament_name.clone(),
            })
            .await?;

        let context = OpportunityContext {
            opportunity,
            leaderboard,
            validation,
            stake,
            skill,
            track_record: self.track_record(matched.market_type).await?,
        };

        info!(
            player = matched.player,
            market_type = %matched.market_type,
            model = format!("{:.0}%", matched.model_prob * 100.0),
            ask = market.yes_ask,
            bid = market.yes_bid,
            edge = format!("{edge_pct:+.1}"),
            validation = context.validation.confidence.as_str(),
            "Evaluating opportunity"
        );

        let verdict = match self.services.agent.evaluate(&context).await {
            Ok(verdict) => apply_kelly_override(verdict, &context.stake),
            Err(e) => {
                warn!(ticker = %market.ticker, error = %e, "Decision agent unavailable, using fallback");
                fallback_verdict(edge_pct)
            }
        };

        ledger
            .record_decision(context.opportunity.id, &verdict, state.phase)
            .await?;
        info!(
            ticker = %market.ticker,
            verdict = %verdict.verdict,
            confidence = verdict.confidence,
            stake_pct = verdict.stake_pct,
            "Decision recorded"
        );

        let mut evaluation = Evaluation {
            opportunity_id: context.opportunity.id,
            player_name: matched.player.to_string(),
            ticker: market.ticker.clone(),
            market_type: matched.market_type,
            model_prob: matched.model_prob,
            implied_prob: implied,
            edge_pct,
            yes_ask: market.yes_ask,
            yes_bid: market.yes_bid,
            verdict: verdict.verdict,
            confidence: verdict.confidence,
            stake_pct: verdict.stake_pct,
            reasoning: verdict.reasoning.clone(),
            validation: context.validation.confidence,
            alerted: false,
            position_opened: false,
        };

        if verdict.verdict == Verdict::Bet {
            self.act_on_bet(market, context, verdict, state, &mut evaluation)
                .await?;
        }
        Ok(evaluation)
    }

    /// Alert, and on delivery open the position and its CLV row.
    async fn act_on_bet(
        &self,
        market: &Market,
        context: OpportunityContext,
        verdict: AgentVerdict,
        state: &TournamentState,
        evaluation: &mut Evaluation,
    ) -> Result<()> {
        let alert = Alert::Recommendation(Box::new(Recommendation {
            opportunity: context.opportunity,
            verdict,
            yes_ask: market.yes_ask,
            yes_bid: market.yes_bid,
            leaderboard: context.leaderboard,
            validation: context.validation,
            stake: context.stake,
        }));

        if !self.services.alerts.send(&alert).await {
            info!(ticker = %market.ticker, "BET alert not delivered, no position opened");
            return Ok(());
        }
        evaluation.alerted = true;

        let ledger = &self.services.ledger;
        let opened = ledger
            .open_position(&NewPosition {
                opportunity_id: evaluation.opportunity_id,
                ticker: market.ticker.clone(),
                player_name: evaluation.player_name.clone(),
                market_type: evaluation.market_type,
                entry_price: market.yes_ask,
                entry_edge: evaluation.edge_pct,
                tournament_name: state.tournament_name.clone(),
            })
            .await?;
        if let OpenOutcome::Opened(id) = opened {
            evaluation.position_opened = true;
            info!(id, ticker = %market.ticker, entry = market.yes_ask, "Position opened");
        }

        ledger
            .record_clv_entry(
                &market.ticker,
                &evaluation.player_name,
                evaluation.market_type,
                market.yes_ask,
            )
            .await?;
        Ok(())
    }

    async fn track_record(&self, market_type: MarketType) -> Result<TrackRecord> {
        let ledger = &self.services.ledger;
        Ok(TrackRecord {
            overall: ledger.accuracy_stats(None, None).await?,
            market_type: ledger.accuracy_stats(Some(market_type), None).await?,
            large_edge: ledger.accuracy_stats(None, Some(LARGE_EDGE)).await?,
            recent_bets: ledger
                .bet_history(&BetHistoryFilter {
                    market_type: Some(market_type),
                    verdict: Some(Verdict::Bet),
                    limit: RECENT_BETS,
                    ..Default::default()
                })
                .await?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use crate::feeds::{MarketFeed, ModelFeed};
    use crate::llm::MockDecisionAgent;
    use crate::storage::Ledger;
    use crate::strategy::kelly::KellyConfig;
    use crate::types::{
        BookOdds, MarketStatus, Phase, PositionStatus, PreTournament, SkillBreakdown,
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PLAYER: &str = "Scottie Scheffler";

    struct StubModel;

    #[async_trait]
    impl ModelFeed for StubModel {
        async fn in_play(&self) -> Result<InPlaySnapshot> {
            Ok(InPlaySnapshot::default())
        }
        async fn pre_tournament(&self) -> Result<PreTournament> {
            Ok(PreTournament::default())
        }
        async fn book_odds(&self, _market_type: MarketType) -> Result<BookOdds> {
            Ok(BookOdds::new())
        }
        async fn skill_breakdown(&self) -> Result<HashMap<String, SkillBreakdown>> {
            Err(anyhow!("skills offline"))
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    /// Refreshes to fixed quotes, or fails when none are set.
    struct StubMarket {
        refreshed: Option<(f64, f64)>,
    }

    #[async_trait]
    impl MarketFeed for StubMarket {
        async fn discover_markets(&self) -> Result<Vec<Market>> {
            Ok(Vec::new())
        }
        async fn refresh_prices(&self, market: &mut Market) -> Result<()> {
            let (ask, bid) = self.refreshed.ok_or_else(|| anyhow!("order book unavailable"))?;
            market.yes_ask = ask;
            market.yes_bid = bid;
            Ok(())
        }
        async fn market_status(&self, _ticker: &str) -> Result<MarketStatus> {
            Ok(MarketStatus::Open)
        }
        fn name(&self) -> &str {
            "stub"
        }
    }

    struct CountingSink {
        sent: Arc<AtomicUsize>,
        deliver: bool,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &Alert) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.deliver
        }
    }

    fn in_play() -> InPlaySnapshot {
        let mut snap = InPlaySnapshot {
            tournament_name: Some("The Test Open".into()),
            ..Default::default()
        };
        snap.probabilities.insert(
            PLAYER.into(),
            PlayerProbabilities {
                win: 30.0,
                top_5: 80.0,
                top_10: 90.0,
                top_20: 97.0,
                make_cut: 100.0,
            },
        );
        snap.leaderboard.insert(
            PLAYER.into(),
            LeaderboardEntry {
                position: 1,
                score_to_par: -12,
                round: 4,
                thru: 9,
            },
        );
        snap
    }

    fn state() -> TournamentState {
        TournamentState {
            phase: Phase::LiveRound,
            tournament_name: Some("The Test Open".into()),
            round_num: 4,
        }
    }

    async fn scanner(
        agent: MockDecisionAgent,
        refreshed: Option<(f64, f64)>,
        deliver: bool,
    ) -> (OpportunityScanner, Ledger, Arc<AtomicUsize>) {
        let ledger = Ledger::in_memory().await.unwrap();
        let sent = Arc::new(AtomicUsize::new(0));
        let services = Services {
            model: Arc::new(StubModel),
            market: Arc::new(StubMarket { refreshed }),
            agent: Arc::new(agent),
            alerts: Arc::new(CountingSink { sent: sent.clone(), deliver }),
            ledger: ledger.clone(),
        };
        let scanner = OpportunityScanner::new(
            ScannerConfig::default(),
            StakeSizer::new(KellyConfig::default()),
            services,
        );
        (scanner, ledger, sent)
    }

    fn verdict(v: Verdict) -> AgentVerdict {
        AgentVerdict {
            verdict: v,
            confidence: 0.7,
            stake_pct: 2.0,
            reasoning: "model well clear of market".into(),
        }
    }

    // -- Pure screening --------------------------------------------------

    #[test]
    fn test_screen_passes_clear_edge() {
        let market = Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0);
        let lb = LeaderboardEntry { position: 1, score_to_par: -12, round: 4, thru: 9 };
        match screen_quotes(&market, 0.30, MarketType::Winner, Some(&lb), min_edge_for_round(8.0, 4), 15.0) {
            Screen::Passed { edge_pct } => assert!((edge_pct - 12.0).abs() < 1e-9),
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn test_screen_edge_too_low_only_recorded_when_positive() {
        let market = Market::sample(PLAYER, MarketType::Winner, 25.0, 22.0);
        assert!(matches!(
            screen_quotes(&market, 0.30, MarketType::Winner, None, 8.0, 15.0),
            Screen::Skipped { reason: SkipReason::EdgeTooLow, .. }
        ));
        assert_eq!(
            screen_quotes(&market, 0.20, MarketType::Winner, None, 8.0, 15.0),
            Screen::Ignored
        );
    }

    #[test]
    fn test_screen_spread_and_zero_ask() {
        let wide = Market::sample(PLAYER, MarketType::Winner, 18.0, 2.0);
        assert!(matches!(
            screen_quotes(&wide, 0.30, MarketType::Winner, None, 8.0, 15.0),
            Screen::Skipped { reason: SkipReason::SpreadTooWide, .. }
        ));

        let unpriced = Market::sample(PLAYER, MarketType::Winner, 0.0, 0.0);
        assert_eq!(
            screen_quotes(&unpriced, 0.30, MarketType::Winner, None, 8.0, 15.0),
            Screen::Ignored
        );
    }

    #[test]
    fn test_screen_stale_placement_price() {
        let market = Market::sample(PLAYER, MarketType::Top10, 60.0, 55.0);
        let inside = LeaderboardEntry { position: 4, score_to_par: -9, round: 3, thru: 12 };
        assert!(matches!(
            screen_quotes(&market, 0.90, MarketType::Top10, Some(&inside), 8.0, 15.0),
            Screen::Skipped { reason: SkipReason::StalePrice, .. }
        ));

        // Round 2 is too early for the heuristic.
        let early = LeaderboardEntry { round: 2, ..inside };
        assert!(matches!(
            screen_quotes(&market, 0.90, MarketType::Top10, Some(&early), 8.0, 15.0),
            Screen::Passed { .. }
        ));

        // Winner markets have no qualification threshold.
        let winner = Market::sample(PLAYER, MarketType::Winner, 60.0, 55.0);
        assert!(matches!(
            screen_quotes(&winner, 0.90, MarketType::Winner, Some(&inside), 8.0, 15.0),
            Screen::Passed { .. }
        ));
    }

    #[test]
    fn test_match_market_silent_misses() {
        let snap = in_play();
        let market = Market::sample("Scottie Schefler", MarketType::Winner, 18.0, 13.0);
        let matched = match_market(&market, &snap.probabilities, 0.6).unwrap();
        assert_eq!(matched.player, PLAYER);
        assert!((matched.model_prob - 0.30).abs() < 1e-12);

        let stranger = Market::sample("Tiger Woods", MarketType::Winner, 18.0, 13.0);
        assert!(match_market(&stranger, &snap.probabilities, 0.6).is_none());

        let mut unmapped = Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0);
        unmapped.market_type = "round_leader".into();
        assert!(match_market(&unmapped, &snap.probabilities, 0.6).is_none());
    }

    // -- Full scan -------------------------------------------------------

    #[tokio::test]
    async fn test_delivered_bet_opens_position_with_kelly_stake() {
        let mut agent = MockDecisionAgent::new();
        agent
            .expect_evaluate()
            .times(1)
            .returning(|_| Ok(verdict(Verdict::Bet)));
        let (scanner, ledger, sent) = scanner(agent, Some((18.0, 13.0)), true).await;

        let mut markets = vec![Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0)];
        let report = scanner
            .scan(&mut markets, &in_play(), &state(), &mut CycleContext::new())
            .await
            .unwrap();

        assert_eq!(report.evaluations.len(), 1);
        assert_eq!(report.positions_opened, 1);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        let eval = &report.evaluations[0];
        assert!((eval.stake_pct - 3.66).abs() < 0.01);

        let open = ledger.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, PositionStatus::Open);
        assert_eq!(open[0].entry_price, 18.0);
        assert!(ledger.clv_record(&markets[0].ticker).await.unwrap().is_some());

        let decisions = ledger.decisions_for(eval.opportunity_id).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert!((decisions[0].stake_pct - 3.66).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_refresh_rescreens_with_fresh_edge() {
        let mut agent = MockDecisionAgent::new();
        agent.expect_evaluate().never();
        let (scanner, ledger, _) = scanner(agent, Some((25.0, 20.0)), true).await;

        let mut markets = vec![Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0)];
        let report = scanner
            .scan(&mut markets, &in_play(), &state(), &mut CycleContext::new())
            .await
            .unwrap();

        assert!(report.evaluations.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::EdgeTooLow);
        assert_eq!(markets[0].yes_ask, 25.0);
        assert!(ledger.recent_opportunities(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_error_falls_back() {
        let mut agent = MockDecisionAgent::new();
        agent
            .expect_evaluate()
            .times(1)
            .returning(|_| Err(anyhow!("connection refused")));
        let (scanner, ledger, sent) = scanner(agent, None, true).await;

        let mut markets = vec![Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0)];
        let report = scanner
            .scan(&mut markets, &in_play(), &state(), &mut CycleContext::new())
            .await
            .unwrap();

        // 12-point edge is under the fallback's BET threshold.
        let eval = &report.evaluations[0];
        assert_eq!(eval.verdict, Verdict::Watch);
        assert_eq!(eval.stake_pct, 0.0);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert!(ledger.open_positions().await.unwrap().is_empty());
        assert_eq!(ledger.decisions_for(eval.opportunity_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undelivered_bet_opens_nothing() {
        let mut agent = MockDecisionAgent::new();
        agent
            .expect_evaluate()
            .returning(|_| Ok(verdict(Verdict::Bet)));
        let (scanner, ledger, sent) = scanner(agent, Some((18.0, 13.0)), false).await;

        let mut markets = vec![Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0)];
        let report = scanner
            .scan(&mut markets, &in_play(), &state(), &mut CycleContext::new())
            .await
            .unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert_eq!(report.alerts_sent, 0);
        assert!(ledger.open_positions().await.unwrap().is_empty());
        assert!(ledger.clv_record(&markets[0].ticker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pass_is_recorded_without_alert() {
        let mut agent = MockDecisionAgent::new();
        agent
            .expect_evaluate()
            .returning(|_| Ok(verdict(Verdict::Pass)));
        let (scanner, ledger, sent) = scanner(agent, Some((18.0, 13.0)), true).await;

        let mut markets = vec![Market::sample(PLAYER, MarketType::Winner, 18.0, 13.0)];
        let report = scanner
            .scan(&mut markets, &in_play(), &state(), &mut CycleContext::new())
            .await
            .unwrap();

        assert_eq!(report.evaluations[0].verdict, Verdict::Pass);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.recommendation_stats().await.unwrap().pass, 1);
    }
}
