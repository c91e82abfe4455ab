//! Full-cycle pipeline tests.
//!
//! Each test wires mock collaborators into a real orchestrator backed by
//! an in-memory ledger and drives one or more cycles.

use std::sync::Arc;
use std::time::Duration;

use fairway::config::AppConfig;
use fairway::engine::orchestrator::Orchestrator;
use fairway::engine::Services;
use fairway::storage::{Ledger, OpenOutcome};
use fairway::types::*;

use crate::mock_feeds::*;

const SCHEFFLER: &str = "Scottie Scheffler";
const MCILROY: &str = "Rory McIlroy";
const TICKER: &str = "KXPGATOUR-MOCK-SSCH";

fn config() -> AppConfig {
    AppConfig::from_toml_str(
        r#"
        [agent]
        name = "FAIRWAY-TEST"
        database_url = "sqlite::memory:"
        bankroll = 1000.0
        "#,
    )
    .unwrap()
}

/// Round 4 in progress; Scheffler leads at a 30% model win probability.
fn final_round(scheffler_win: f64) -> InPlaySnapshot {
    live_snapshot(&[
        (SCHEFFLER, scheffler_win, on_course(1, -12, 4, 9)),
        (MCILROY, 10.0, on_course(4, -8, 4, 11)),
    ])
}

struct Harness {
    model: Arc<MockModelFeed>,
    market: Arc<MockMarketFeed>,
    agent: Arc<ScriptedAgent>,
    sink: Arc<RecordingSink>,
    ledger: Ledger,
    orch: Orchestrator,
}

async fn harness(
    model: MockModelFeed,
    market: MockMarketFeed,
    agent: ScriptedAgent,
    sink: RecordingSink,
) -> Harness {
    let ledger = Ledger::in_memory().await.unwrap();
    let model = Arc::new(model);
    let market = Arc::new(market);
    let agent = Arc::new(agent);
    let sink = Arc::new(sink);

    let services = Services {
        model: model.clone(),
        market: market.clone(),
        agent: agent.clone(),
        alerts: sink.clone(),
        ledger: ledger.clone(),
    };
    let orch = Orchestrator::new(&config(), services);

    Harness {
        model,
        market,
        agent,
        sink,
        ledger,
        orch,
    }
}

/// Live final round with one listed Scheffler winner market at 18/13.
async fn betting_harness(agent: ScriptedAgent, deliver: bool) -> Harness {
    harness(
        MockModelFeed::live(final_round(30.0)),
        MockMarketFeed::new(vec![market(TICKER, SCHEFFLER, MarketType::Winner, 18.0, 13.0)]),
        agent,
        RecordingSink::delivering(deliver),
    )
    .await
}

async fn opportunity_for(ledger: &Ledger, ticker: &str) -> i64 {
    let draft = OpportunityDraft {
        player_name: SCHEFFLER.into(),
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
    };
    ledger.record_opportunity(&draft).await.unwrap().id
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_bet_opens_one_position() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;

    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.phase, Phase::LiveRound);
    assert_eq!(snapshot.round_num, 4);
    assert!(snapshot.error.is_none());
    assert!((snapshot.scan.min_edge - 6.956).abs() < 0.01);

    let eval = &snapshot.scan.evaluations[0];
    assert!((eval.edge_pct - 12.0).abs() < 1e-9);
    assert_eq!(eval.verdict, Verdict::Bet);
    // Quarter-Kelly at p=0.30, price 18¢ overrides the agent's 2%.
    assert!((eval.stake_pct - 3.66).abs() < 0.01);
    assert!(eval.position_opened);

    let open = h.ledger.open_positions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].ticker, TICKER);
    assert_eq!(open[0].entry_price, 18.0);
    assert_eq!(open[0].opportunity_id, Some(eval.opportunity_id));

    let clv = h.ledger.clv_record(TICKER).await.unwrap().unwrap();
    assert_eq!(clv.entry_price, 18.0);
    assert_eq!(clv.closing_price, Some(13.0));

    assert_eq!(h.sink.recommendations(), 1);
    assert_eq!(h.agent.calls(), 1);
    assert_eq!(snapshot.next_poll_secs, config().polling.live_round_secs);
}

#[tokio::test]
async fn test_repeat_bet_across_cycles_keeps_one_open_position() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;

    h.orch.run_cycle().await;
    let second = h.orch.run_cycle().await;

    assert_eq!(second.scan.evaluations.len(), 1);
    assert!(!second.scan.evaluations[0].position_opened);
    assert_eq!(h.ledger.open_positions().await.unwrap().len(), 1);
    assert_eq!(h.ledger.recommendation_stats().await.unwrap().bet, 2);
}

#[tokio::test]
async fn test_book_odds_feed_validation_tier() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Watch, 0.0), true).await;
    h.model.set_book_odds(SCHEFFLER, &[("pinnacle", 0.33), ("draftkings", 0.31)]);

    let snapshot = h.orch.run_cycle().await;

    // Model 30% is under Pinnacle's 33%.
    assert_eq!(
        snapshot.scan.evaluations[0].validation,
        fairway::strategy::edge::ValidationConfidence::Low
    );
    assert_eq!(h.sink.recommendations(), 0);
}

// ---------------------------------------------------------------------------
// Exits and settlement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_profit_target_exit_closes_at_bid() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.orch.run_cycle().await;

    h.market.set_quotes(TICKER, 36.0, 34.0);
    h.model.set_win(SCHEFFLER, 40.0);
    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.exits.len(), 1);
    assert_eq!(snapshot.exits[0].exit_price, 34.0);
    assert!(h.ledger.open_positions().await.unwrap().is_empty());

    let closed = &h.ledger.positions(10).await.unwrap()[0];
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.profit, Some(16.0));

    let clv = h.ledger.clv_record(TICKER).await.unwrap().unwrap();
    assert_eq!(clv.closing_price, Some(34.0));
    assert_eq!(clv.clv_cents, Some(16.0));

    let exits = h.sink.exit_messages();
    assert_eq!(exits.len(), 1);
    assert!(exits[0].contains("Profit target"));
}

#[tokio::test]
async fn test_edge_reversal_exit() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.orch.run_cycle().await;

    h.market.set_quotes(TICKER, 20.0, 15.0);
    h.model.set_win(SCHEFFLER, 5.0);
    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.exits.len(), 1);
    assert!(snapshot.exits[0].reason.starts_with("Edge flipped to -15.0%"));
    let closed = &h.ledger.positions(10).await.unwrap()[0];
    assert_eq!(closed.profit, Some(-3.0));
}

#[tokio::test]
async fn test_delisted_position_settles_as_win() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    let first = h.orch.run_cycle().await;
    let opportunity_id = first.scan.evaluations[0].opportunity_id;

    h.market.set_markets(Vec::new());
    h.market.set_status(TICKER, StatusReply::Settled { won: true });
    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.settlement.settled, 1);
    let closed = &h.ledger.positions(10).await.unwrap()[0];
    assert_eq!(closed.exit_price, Some(100.0));
    assert_eq!(closed.profit, Some(82.0));

    let outcome = h.ledger.outcome_for(opportunity_id).await.unwrap().unwrap();
    assert_eq!(outcome.result, OutcomeResult::Win);

    let clv = h.ledger.clv_record(TICKER).await.unwrap().unwrap();
    assert_eq!(clv.outcome, Some(OutcomeResult::Win));
    assert_eq!(clv.settlement_price, Some(100.0));

    let accuracy = h.ledger.accuracy_stats(None, None).await.unwrap();
    assert_eq!(accuracy.wins, 1);

    // Nothing left to settle.
    let calls = h.market.status_calls();
    h.orch.run_cycle().await;
    assert_eq!(h.market.status_calls(), calls);
}

#[tokio::test]
async fn test_settlement_lookup_failure_keeps_position_open() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.orch.run_cycle().await;

    h.market.set_markets(Vec::new());
    h.market.set_status(TICKER, StatusReply::Fail("HTTP 503".into()));
    let snapshot = h.orch.run_cycle().await;

    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.settlement.settled, 0);
    assert_eq!(snapshot.settlement.still_open, 1);
    assert_eq!(snapshot.settlement.errors.len(), 1);
    assert_eq!(snapshot.settlement.errors[0].ticker, TICKER);
    assert_eq!(h.ledger.open_positions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_positions_settle_by_ticker() {
    let mut h = harness(
        MockModelFeed::offline(),
        MockMarketFeed::new(Vec::new()),
        ScriptedAgent::answering(Verdict::Pass, 0.0),
        RecordingSink::delivering(true),
    )
    .await;

    for ticker in [Some("KXPGATOP10-MOCK-RMCI"), None] {
        h.ledger
            .add_manual_position(&NewManualPosition {
                ticker: ticker.map(String::from),
                player_name: MCILROY.into(),
                market_type: MarketType::Top10,
                entry_price: 40.0,
                quantity: 2,
                notes: None,
            })
            .await
            .unwrap();
    }
    h.market
        .set_status("KXPGATOP10-MOCK-RMCI", StatusReply::Settled { won: false });

    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.manual_settlement.settled, 1);
    assert_eq!(snapshot.manual_settlement.skipped, 1);

    let stats = h.ledger.manual_position_stats().await.unwrap();
    assert_eq!(stats.open_count, 1);
    assert_eq!(stats.closed_count, 1);
}

// ---------------------------------------------------------------------------
// Degraded collaborators
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_undelivered_alert_opens_nothing() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), false).await;

    let snapshot = h.orch.run_cycle().await;

    assert_eq!(h.sink.recommendations(), 1);
    assert_eq!(snapshot.scan.alerts_sent, 0);
    assert!(h.ledger.open_positions().await.unwrap().is_empty());
    assert!(h.ledger.clv_record(TICKER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_agent_failure_uses_fallback_without_kelly_override() {
    let mut h = harness(
        MockModelFeed::live(final_round(40.0)),
        MockMarketFeed::new(vec![market(TICKER, SCHEFFLER, MarketType::Winner, 20.0, 17.0)]),
        ScriptedAgent::failing("connection reset"),
        RecordingSink::delivering(true),
    )
    .await;

    let snapshot = h.orch.run_cycle().await;

    let eval = &snapshot.scan.evaluations[0];
    assert_eq!(eval.verdict, Verdict::Bet);
    assert_eq!(eval.stake_pct, 1.0);
    assert_eq!(eval.confidence, 0.5);
    assert!(eval.reasoning.starts_with("Fallback"));
    assert!(eval.position_opened);
    assert_eq!(h.agent.calls(), 1);
}

#[tokio::test]
async fn test_model_outage_still_monitors_open_positions() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.orch.run_cycle().await;

    h.model.set_in_play(None);
    h.market.set_quotes(TICKER, 38.0, 35.0);
    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.scan.evaluations.is_empty());
    // Bid 35 clears the profit target even without model data.
    assert_eq!(snapshot.exits.len(), 1);
    assert_eq!(h.agent.calls(), 1);
}

#[tokio::test]
async fn test_discovery_failure_is_a_quiet_cycle() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.market.fail_discovery("HTTP 500");

    let snapshot = h.orch.run_cycle().await;

    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.phase, Phase::LiveRound);
    assert_eq!(snapshot.markets_found, 0);
    assert_eq!(h.agent.calls(), 0);
}

#[tokio::test]
async fn test_internal_error_yields_idle_snapshot_and_retry_interval() {
    let mut h = betting_harness(ScriptedAgent::answering(Verdict::Bet, 2.0), true).await;
    h.ledger.pool().close().await;

    let snapshot = h.orch.run_cycle().await;

    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.error.is_some());
    assert_eq!(snapshot.next_poll_secs, config().polling.retry_secs);

    // The loop keeps going.
    let next = h.orch.run_cycle().await;
    assert_eq!(next.cycle, 2);
}

// ---------------------------------------------------------------------------
// Loop control and durability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_now_cuts_sleep_short_and_shutdown_stops_loop() {
    let h = betting_harness(ScriptedAgent::answering(Verdict::Pass, 0.0), true).await;
    let mut rx = h.orch.subscribe();
    let scan_now = h.orch.scan_now_handle();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(h.orch.run_until(async move {
        let _ = stop_rx.await;
    }));

    let wait_for = |target: u64| {
        let mut rx = rx.clone();
        async move {
            while rx.borrow_and_update().cycle < target {
                rx.changed().await.unwrap();
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(5), wait_for(1))
        .await
        .unwrap();
    // Live-round interval is two minutes; only the trigger can start cycle 2.
    scan_now.notify_one();
    tokio::time::timeout(Duration::from_secs(5), wait_for(2))
        .await
        .unwrap();

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(rx.borrow_and_update().cycle >= 2);
}

#[tokio::test]
async fn test_open_uniqueness_survives_reconnect() {
    let path = std::env::temp_dir().join(format!("fairway-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());

    let position = |opportunity_id| NewPosition {
        opportunity_id,
        ticker: TICKER.into(),
        player_name: SCHEFFLER.into(),
        market_type: MarketType::Winner,
        entry_price: 18.0,
        entry_edge: 12.0,
        tournament_name: None,
    };

    {
        let ledger = Ledger::connect(&url).await.unwrap();
        let id = opportunity_for(&ledger, TICKER).await;
        assert!(matches!(
            ledger.open_position(&position(id)).await.unwrap(),
            OpenOutcome::Opened(_)
        ));
        ledger.pool().close().await;
    }

    let ledger = Ledger::connect(&url).await.unwrap();
    let id = opportunity_for(&ledger, TICKER).await;
    assert_eq!(
        ledger.open_position(&position(id)).await.unwrap(),
        OpenOutcome::AlreadyOpen
    );
    assert_eq!(ledger.open_positions().await.unwrap().len(), 1);
    ledger.pool().close().await;

    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}
