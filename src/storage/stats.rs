//! Read-only aggregate views over the ledger.
//!
//! Nothing here mutates state. The track record handed to the decision
//! step and the status API's `/api/stats` payload are both built from
//! these queries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{opt_u32, Ledger};
use crate::types::{MarketType, OutcomeResult, Phase, Verdict};

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// View types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionStats {
    pub open_count: i64,
    pub closed_count: i64,
    /// Sum of closed-position profit, in cents.
    pub total_realized_pnl: f64,
    /// Share of closed positions with positive profit (0.0–1.0).
    pub win_rate: f64,
    pub avg_hold_minutes: f64,
}

/// Win/loss record of BET decisions with a settled outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccuracyStats {
    pub wins: i64,
    pub losses: i64,
    pub total: i64,
    /// 0.0–1.0
    pub accuracy: f64,
}

impl AccuracyStats {
    fn from_counts(wins: i64, losses: i64) -> Self {
        let total = wins + losses;
        Self {
            wins,
            losses,
            total,
            accuracy: if total > 0 { wins as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BetHistoryFilter {
    pub market_type: Option<MarketType>,
    pub min_edge: Option<f64>,
    pub round: Option<u32>,
    pub verdict: Option<Verdict>,
    pub limit: i64,
}

impl Default for BetHistoryFilter {
    fn default() -> Self {
        Self {
            market_type: None,
            min_edge: None,
            round: None,
            verdict: None,
            limit: 50,
        }
    }
}

/// One past decision joined with its opportunity and any outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BetHistoryEntry {
    pub player_name: String,
    pub market_type: MarketType,
    pub model_prob: f64,
    pub implied_prob: f64,
    pub edge_pct: f64,
    pub round: Option<u32>,
    pub position: Option<u32>,
    pub verdict: Verdict,
    pub reasoning: String,
    pub confidence: f64,
    pub result: Option<OutcomeResult>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClvStats {
    pub total_bets: i64,
    pub avg_clv_cents: f64,
    pub positive_clv_pct: f64,
    pub wins: i64,
    pub avg_clv_wins: f64,
    pub avg_clv_losses: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats {
    pub phase: Phase,
    pub opportunities: i64,
    pub bets: i64,
    pub accuracy: AccuracyStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManualPositionStats {
    pub open_count: i64,
    pub closed_count: i64,
    pub total_realized_pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecommendationStats {
    pub bet: i64,
    pub pass: i64,
    pub watch: i64,
    pub total: i64,
}

/// Everything `/api/stats` serves, in one payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatsOverview {
    pub positions: PositionStats,
    pub accuracy: AccuracyStats,
    pub clv: ClvStats,
    pub by_phase: Vec<PhaseStats>,
    pub manual: ManualPositionStats,
    pub recommendations: RecommendationStats,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Ledger {
    pub async fn position_stats(&self) -> Result<PositionStats> {
        let open_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE status = 'OPEN'")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count open positions")?;

        let rows = sqlx::query(
            "SELECT entry_timestamp, exit_timestamp, profit_loss FROM positions WHERE status = 'CLOSED'",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load closed positions")?;

        let mut stats = PositionStats {
            open_count,
            closed_count: rows.len() as i64,
            ..Default::default()
        };
        if rows.is_empty() {
            return Ok(stats);
        }

        let mut wins = 0usize;
        let mut hold_minutes = Vec::with_capacity(rows.len());
        for row in &rows {
            let profit: Option<f64> = row.try_get("profit_loss")?;
            let profit = profit.unwrap_or(0.0);
            stats.total_realized_pnl += profit;
            if profit > 0.0 {
                wins += 1;
            }

            let entry: DateTime<Utc> = row.try_get("entry_timestamp")?;
            let exit: Option<DateTime<Utc>> = row.try_get("exit_timestamp")?;
            if let Some(exit) = exit {
                hold_minutes.push((exit - entry).num_seconds() as f64 / 60.0);
            }
        }

        stats.win_rate = wins as f64 / rows.len() as f64;
        if !hold_minutes.is_empty() {
            stats.avg_hold_minutes = hold_minutes.iter().sum::<f64>() / hold_minutes.len() as f64;
        }
        Ok(stats)
    }

    /// Record of BET decisions, optionally narrowed by market type and a
    /// minimum edge.
    pub async fn accuracy_stats(
        &self,
        market_type: Option<MarketType>,
        min_edge: Option<f64>,
    ) -> Result<AccuracyStats> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT r.result AS result, COUNT(*) AS cnt
            FROM opportunities o
            JOIN decisions d ON d.opportunity_id = o.id
            JOIN outcomes r ON r.opportunity_id = o.id
            WHERE d.decision = 'BET' AND r.result IN ('WIN', 'LOSS')
            "#,
        );
        if let Some(mt) = market_type {
            qb.push(" AND o.market_type = ").push_bind(mt.as_str());
        }
        if let Some(edge) = min_edge {
            qb.push(" AND o.edge_pct >= ").push_bind(edge);
        }
        qb.push(" GROUP BY r.result");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to compute accuracy stats")?;

        let (mut wins, mut losses) = (0, 0);
        for row in rows {
            let result: String = row.try_get("result")?;
            let count: i64 = row.try_get("cnt")?;
            match result.as_str() {
                "WIN" => wins = count,
                "LOSS" => losses = count,
                _ => {}
            }
        }
        Ok(AccuracyStats::from_counts(wins, losses))
    }

    /// Past decisions, newest first.
    pub async fn bet_history(&self, filter: &BetHistoryFilter) -> Result<Vec<BetHistoryEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT o.player_name, o.market_type, o.model_prob, o.implied_prob, o.edge_pct,
                   o.round_number, o.leaderboard_position, d.decision, d.reasoning,
                   d.confidence, d.timestamp, r.result
            FROM opportunities o
            JOIN decisions d ON d.opportunity_id = o.id
            LEFT JOIN outcomes r ON r.opportunity_id = o.id
            WHERE 1 = 1
            "#,
        );
        if let Some(mt) = filter.market_type {
            qb.push(" AND o.market_type = ").push_bind(mt.as_str());
        }
        if let Some(edge) = filter.min_edge {
            qb.push(" AND o.edge_pct >= ").push_bind(edge);
        }
        if let Some(round) = filter.round {
            qb.push(" AND o.round_number = ").push_bind(i64::from(round));
        }
        if let Some(verdict) = filter.verdict {
            qb.push(" AND d.decision = ").push_bind(verdict.as_str());
        }
        qb.push(" ORDER BY d.id DESC LIMIT ").push_bind(filter.limit);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to load bet history")?;

        rows.iter()
            .map(|row| -> Result<BetHistoryEntry> {
                let result: Option<String> = row.try_get("result")?;
                Ok(BetHistoryEntry {
                    player_name: row.try_get("player_name")?,
                    market_type: row.try_get::<String, _>("market_type")?.parse()?,
                    model_prob: row.try_get("model_prob")?,
                    implied_prob: row.try_get("implied_prob")?,
                    edge_pct: row.try_get("edge_pct")?,
                    round: opt_u32(row, "round_number")?,
                    position: opt_u32(row, "leaderboard_position")?,
                    verdict: row.try_get::<String, _>("decision")?.parse()?,
                    reasoning: row.try_get("reasoning")?,
                    confidence: row.try_get("confidence")?,
                    result: result.map(|r| r.parse()).transpose()?,
                    timestamp: row.try_get("timestamp")?,
                })
            })
            .collect()
    }

    pub async fn clv_stats(&self) -> Result<ClvStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   AVG(clv_cents) AS avg_clv,
                   SUM(CASE WHEN clv_cents > 0 THEN 1 ELSE 0 END) AS positive_clv,
                   SUM(CASE WHEN outcome = 'WIN' THEN 1 ELSE 0 END) AS wins,
                   AVG(CASE WHEN outcome = 'WIN' THEN clv_cents END) AS avg_clv_wins,
                   AVG(CASE WHEN outcome = 'LOSS' THEN clv_cents END) AS avg_clv_losses
            FROM clv_tracking
            WHERE clv_cents IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute CLV stats")?;

        let total: i64 = row.try_get("total")?;
        let positive: Option<i64> = row.try_get("positive_clv")?;
        let avg = |col: &str| -> Result<f64> {
            let v: Option<f64> = row.try_get(col)?;
            Ok(round1(v.unwrap_or(0.0)))
        };

        Ok(ClvStats {
            total_bets: total,
            avg_clv_cents: avg("avg_clv")?,
            positive_clv_pct: if total > 0 {
                round1(positive.unwrap_or(0) as f64 / total as f64 * 100.0)
            } else {
                0.0
            },
            wins: row.try_get::<Option<i64>, _>("wins")?.unwrap_or(0),
            avg_clv_wins: avg("avg_clv_wins")?,
            avg_clv_losses: avg("avg_clv_losses")?,
        })
    }

    /// Opportunity and BET counts plus accuracy, per generation phase.
    /// Phases with no opportunities are omitted.
    pub async fn stats_by_phase(&self) -> Result<Vec<PhaseStats>> {
        let rows = sqlx::query(
            r#"
            SELECT o.phase AS phase,
                   COUNT(DISTINCT o.id) AS opportunities,
                   SUM(CASE WHEN d.decision = 'BET' THEN 1 ELSE 0 END) AS bets,
                   SUM(CASE WHEN d.decision = 'BET' AND r.result = 'WIN' THEN 1 ELSE 0 END) AS wins,
                   SUM(CASE WHEN d.decision = 'BET' AND r.result = 'LOSS' THEN 1 ELSE 0 END) AS losses
            FROM opportunities o
            LEFT JOIN decisions d ON d.opportunity_id = o.id
            LEFT JOIN outcomes r ON r.opportunity_id = o.id
            GROUP BY o.phase
            ORDER BY o.phase
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute phase stats")?;

        rows.iter()
            .map(|row| -> Result<PhaseStats> {
                let sum = |col: &str| -> Result<i64> {
                    Ok(row.try_get::<Option<i64>, _>(col)?.unwrap_or(0))
                };
                Ok(PhaseStats {
                    phase: row.try_get::<String, _>("phase")?.parse()?,
                    opportunities: row.try_get("opportunities")?,
                    bets: sum("bets")?,
                    accuracy: AccuracyStats::from_counts(sum("wins")?, sum("losses")?),
                })
            })
            .collect()
    }

    pub async fn manual_position_stats(&self) -> Result<ManualPositionStats> {
        let row = sqlx::query(
            r#"
            SELECT SUM(CASE WHEN status = 'OPEN' THEN 1 ELSE 0 END) AS open_count,
                   SUM(CASE WHEN status = 'CLOSED' THEN 1 ELSE 0 END) AS closed_count,
                   SUM(CASE WHEN status = 'CLOSED' THEN profit_loss END) AS pnl,
                   SUM(CASE WHEN status = 'CLOSED' AND profit_loss > 0 THEN 1 ELSE 0 END) AS wins
            FROM manual_positions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute manual position stats")?;

        let count = |col: &str| -> Result<i64> { Ok(row.try_get::<Option<i64>, _>(col)?.unwrap_or(0)) };
        let closed = count("closed_count")?;
        let wins = count("wins")?;

        Ok(ManualPositionStats {
            open_count: count("open_count")?,
            closed_count: closed,
            total_realized_pnl: row.try_get::<Option<f64>, _>("pnl")?.unwrap_or(0.0),
            win_rate: if closed > 0 { wins as f64 / closed as f64 } else { 0.0 },
        })
    }

    pub async fn recommendation_stats(&self) -> Result<RecommendationStats> {
        let rows = sqlx::query("SELECT decision, COUNT(*) AS cnt FROM decisions GROUP BY decision")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count recommendations")?;

        let mut stats = RecommendationStats::default();
        for row in rows {
            let count: i64 = row.try_get("cnt")?;
            match row.try_get::<String, _>("decision")?.parse::<Verdict>()? {
                Verdict::Bet => stats.bet = count,
                Verdict::Pass => stats.pass = count,
                Verdict::Watch => stats.watch = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    pub async fn stats_overview(&self) -> Result<StatsOverview> {
        Ok(StatsOverview {
            positions: self.position_stats().await?,
            accuracy: self.accuracy_stats(None, None).await?,
            clv: self.clv_stats().await?,
            by_phase: self.stats_by_phase().await?,
            manual: self.manual_position_stats().await?,
            recommendations: self.recommendation_stats().await?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
