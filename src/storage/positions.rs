//! Position lifecycle: open → monitor → exit or settle.
//!
//! Pipeline positions follow `(none) → OPEN → CLOSED` per ticker; the
//! partial unique index in the schema makes a second open for the same
//! ticker a reported no-op. Manual positions share the OPEN/CLOSED shape
//! but carry no uniqueness and no opportunity link.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use super::{opt_u32, Ledger};
use crate::config::ExitConfig;
use crate::feeds::MarketFeed;
use crate::types::{
    ClvRecord, ManualPosition, MarketStatus, MarketType, NewManualPosition, NewPosition,
    OutcomeResult, Position, PositionStatus,
};

/// Price a winning contract settles at, in cents.
const SETTLE_WIN: f64 = 100.0;
const SETTLE_LOSS: f64 = 0.0;

// ---------------------------------------------------------------------------
// Exit rules
// ---------------------------------------------------------------------------

/// Result of an open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(i64),
    AlreadyOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    ProfitTarget { target: f64 },
    EdgeFlipped { edge: f64 },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ProfitTarget { target } => write!(f, "Profit target (+{target:.0}¢)"),
            ExitReason::EdgeFlipped { edge } => write!(f, "Edge flipped to {edge:+.1}%"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExitRules {
    pub profit_target_cents: f64,
    pub edge_reversal_pct: f64,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self::from(&ExitConfig::default())
    }
}

impl From<&ExitConfig> for ExitRules {
    fn from(config: &ExitConfig) -> Self {
        Self {
            profit_target_cents: config.profit_target_cents,
            edge_reversal_pct: config.edge_reversal_pct,
        }
    }
}

impl ExitRules {
    /// Profit target is checked before edge reversal.
    pub fn evaluate(&self, entry_price: f64, current_bid: f64, current_edge: f64) -> Option<ExitReason> {
        if current_bid >= entry_price + self.profit_target_cents {
            return Some(ExitReason::ProfitTarget {
                target: self.profit_target_cents,
            });
        }
        if current_edge <= self.edge_reversal_pct {
            return Some(ExitReason::EdgeFlipped { edge: current_edge });
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Settlement report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SettlementError {
    pub ticker: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SettlementReport {
    pub settled: usize,
    pub still_open: usize,
    /// Positions that cannot be looked up (manual entries without a ticker).
    pub skipped: usize,
    pub errors: Vec<SettlementError>,
}

fn settlement_price(won: bool) -> (f64, OutcomeResult) {
    if won {
        (SETTLE_WIN, OutcomeResult::Win)
    } else {
        (SETTLE_LOSS, OutcomeResult::Loss)
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

impl Ledger {
    // -- Pipeline positions ----------------------------------------------

    /// Open a position. A ticker that already has an OPEN row is reported
    /// as `AlreadyOpen` and nothing changes.
    pub async fn open_position(&self, new: &NewPosition) -> Result<OpenOutcome> {
        let res = sqlx::query(
            r#"
            INSERT INTO positions (
                opportunity_id, ticker, player_name, market_type, entry_price,
                entry_edge, entry_timestamp, tournament_name, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'OPEN')
            "#,
        )
        .bind(new.opportunity_id)
        .bind(&new.ticker)
        .bind(&new.player_name)
        .bind(new.market_type.as_str())
        .bind(new.entry_price)
        .bind(new.entry_edge)
        .bind(Utc::now())
        .bind(&new.tournament_name)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => {
                let id = done.last_insert_rowid();
                info!(
                    id,
                    ticker = %new.ticker,
                    player = %new.player_name,
                    market_type = %new.market_type,
                    entry = new.entry_price,
                    "Position opened"
                );
                Ok(OpenOutcome::Opened(id))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(ticker = %new.ticker, "Position already open");
                Ok(OpenOutcome::AlreadyOpen)
            }
            Err(e) => Err(e).context("Failed to insert position"),
        }
    }

    /// Close the OPEN position for a ticker. Returns whether a row changed.
    pub async fn close_position(&self, ticker: &str, exit_price: f64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE positions
            SET exit_price = ?, exit_timestamp = ?, profit_loss = ? - entry_price, status = 'CLOSED'
            WHERE ticker = ? AND status = 'OPEN'
            "#,
        )
        .bind(exit_price)
        .bind(Utc::now())
        .bind(exit_price)
        .bind(ticker)
        .execute(&self.pool)
        .await
        .context("Failed to close position")?;

        let closed = res.rows_affected() > 0;
        if closed {
            info!(ticker, exit = exit_price, "Position closed");
        }
        Ok(closed)
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status = 'OPEN' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load open positions")?;
        rows.iter().map(position_from_row).collect()
    }

    pub async fn open_position_for(&self, ticker: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE ticker = ? AND status = 'OPEN'")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load position")?;
        row.as_ref().map(position_from_row).transpose()
    }

    /// Most recent positions, open and closed.
    pub async fn positions(&self, limit: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load positions")?;
        rows.iter().map(position_from_row).collect()
    }

    /// Exit trigger for the OPEN position on `ticker`. Only winner markets
    /// are monitored; anything else, or no open position, yields `None`.
    pub async fn check_exit(
        &self,
        ticker: &str,
        current_bid: f64,
        current_edge: f64,
        rules: &ExitRules,
    ) -> Result<Option<ExitReason>> {
        let Some(position) = self.open_position_for(ticker).await? else {
            return Ok(None);
        };
        if position.market_type != MarketType::Winner {
            return Ok(None);
        }
        Ok(rules.evaluate(position.entry_price, current_bid, current_edge))
    }

    // -- Closing line value ----------------------------------------------

    /// Start CLV tracking for a bet. A ticker already tracked is ignored.
    pub async fn record_clv_entry(
        &self,
        ticker: &str,
        player_name: &str,
        market_type: MarketType,
        entry_price: f64,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO clv_tracking (ticker, player_name, market_type, entry_price, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(ticker)
        .bind(player_name)
        .bind(market_type.as_str())
        .bind(entry_price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert CLV entry")?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn update_closing_price(&self, ticker: &str, closing_price: f64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE clv_tracking SET closing_price = ?, clv_cents = ? - entry_price WHERE ticker = ?",
        )
        .bind(closing_price)
        .bind(closing_price)
        .bind(ticker)
        .execute(&self.pool)
        .await
        .context("Failed to update closing price")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn update_clv_outcome(
        &self,
        ticker: &str,
        settlement_price: f64,
        outcome: OutcomeResult,
    ) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE clv_tracking SET settlement_price = ?, outcome = ? WHERE ticker = ?",
        )
        .bind(settlement_price)
        .bind(outcome.as_str())
        .bind(ticker)
        .execute(&self.pool)
        .await
        .context("Failed to update CLV outcome")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn clv_record(&self, ticker: &str) -> Result<Option<ClvRecord>> {
        let row = sqlx::query("SELECT * FROM clv_tracking WHERE ticker = ?")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load CLV record")?;

        row.map(|row| -> Result<ClvRecord> {
            let outcome: Option<String> = row.try_get("outcome")?;
            Ok(ClvRecord {
                ticker: row.try_get("ticker")?,
                player_name: row.try_get("player_name")?,
                market_type: row.try_get::<String, _>("market_type")?.parse()?,
                entry_price: row.try_get("entry_price")?,
                closing_price: row.try_get("closing_price")?,
                clv_cents: row.try_get("clv_cents")?,
                settlement_price: row.try_get("settlement_price")?,
                outcome: outcome.map(|o| o.parse()).transpose()?,
                timestamp: row.try_get("timestamp")?,
            })
        })
        .transpose()
    }

    // -- Manual positions ------------------------------------------------

    pub async fn add_manual_position(&self, new: &NewManualPosition) -> Result<ManualPosition> {
        let now = Utc::now();
        let ticker = new
            .ticker
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let res = sqlx::query(
            r#"
            INSERT INTO manual_positions (
                ticker, player_name, market_type, entry_price, quantity, notes,
                entry_timestamp, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'OPEN')
            "#,
        )
        .bind(&ticker)
        .bind(&new.player_name)
        .bind(new.market_type.as_str())
        .bind(new.entry_price)
        .bind(i64::from(new.quantity))
        .bind(&new.notes)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert manual position")?;

        let id = res.last_insert_rowid();
        info!(id, player = %new.player_name, market_type = %new.market_type, "Manual position added");

        Ok(ManualPosition {
            id,
            ticker,
            player_name: new.player_name.clone(),
            market_type: new.market_type,
            entry_price: new.entry_price,
            quantity: new.quantity,
            notes: new.notes.clone(),
            entry_timestamp: now,
            status: PositionStatus::Open,
            exit_price: None,
            exit_timestamp: None,
            profit: None,
        })
    }

    /// Close one manual position. Returns whether it was open.
    pub async fn close_manual_position(&self, id: i64, exit_price: f64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE manual_positions
            SET exit_price = ?, exit_timestamp = ?, profit_loss = (? - entry_price) * quantity,
                status = 'CLOSED'
            WHERE id = ? AND status = 'OPEN'
            "#,
        )
        .bind(exit_price)
        .bind(Utc::now())
        .bind(exit_price)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to close manual position")?;
        Ok(res.rows_affected() > 0)
    }

    /// Close every OPEN manual position on a ticker. Returns the count closed.
    pub async fn close_manual_positions_by_ticker(&self, ticker: &str, exit_price: f64) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE manual_positions
            SET exit_price = ?, exit_timestamp = ?, profit_loss = (? - entry_price) * quantity,
                status = 'CLOSED'
            WHERE ticker = ? AND status = 'OPEN'
            "#,
        )
        .bind(exit_price)
        .bind(Utc::now())
        .bind(exit_price)
        .bind(ticker)
        .execute(&self.pool)
        .await
        .context("Failed to close manual positions")?;
        Ok(res.rows_affected())
    }

    pub async fn manual_position(&self, id: i64) -> Result<Option<ManualPosition>> {
        let row = sqlx::query("SELECT * FROM manual_positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load manual position")?;
        row.as_ref().map(manual_from_row).transpose()
    }

    pub async fn open_manual_positions(&self) -> Result<Vec<ManualPosition>> {
        let rows = sqlx::query("SELECT * FROM manual_positions WHERE status = 'OPEN' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load open manual positions")?;
        rows.iter().map(manual_from_row).collect()
    }

    pub async fn manual_positions(&self, limit: i64) -> Result<Vec<ManualPosition>> {
        let rows = sqlx::query("SELECT * FROM manual_positions ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load manual positions")?;
        rows.iter().map(manual_from_row).collect()
    }

    // -- Settlement ------------------------------------------------------

    /// Settle OPEN pipeline positions whose ticker is no longer listed.
    ///
    /// A settled position is closed at 100 or 0, its opportunity gets a
    /// WIN/LOSS outcome, and its CLV row records the settlement. A failed
    /// status lookup leaves the position open and is reported per ticker.
    pub async fn reconcile_settlement(
        &self,
        feed: &dyn MarketFeed,
        listed: &HashSet<String>,
    ) -> Result<SettlementReport> {
        let mut report = SettlementReport::default();

        for position in self.open_positions().await? {
            if listed.contains(&position.ticker) {
                report.still_open += 1;
                continue;
            }

            match feed.market_status(&position.ticker).await {
                Ok(MarketStatus::Open) => report.still_open += 1,
                Ok(MarketStatus::Settled { won }) => {
                    let (exit, result) = settlement_price(won);
                    self.close_position(&position.ticker, exit).await?;
                    if let Some(opportunity_id) = position.opportunity_id {
                        self.record_outcome(opportunity_id, result, None).await?;
                    }
                    self.update_clv_outcome(&position.ticker, exit, result).await?;
                    info!(
                        ticker = %position.ticker,
                        player = %position.player_name,
                        market_type = %position.market_type,
                        result = %result,
                        "Position settled"
                    );
                    report.settled += 1;
                }
                Err(e) => {
                    warn!(ticker = %position.ticker, error = %e, "Settlement lookup failed");
                    report.errors.push(SettlementError {
                        ticker: position.ticker.clone(),
                        error: e.to_string(),
                    });
                    report.still_open += 1;
                }
            }
        }

        Ok(report)
    }

    /// Same procedure for manual positions. Entries without a ticker are
    /// skipped; entries sharing a ticker settle together.
    pub async fn reconcile_manual_settlement(
        &self,
        feed: &dyn MarketFeed,
        listed: &HashSet<String>,
    ) -> Result<SettlementReport> {
        let mut report = SettlementReport::default();
        let mut settled_tickers: HashSet<String> = HashSet::new();

        for position in self.open_manual_positions().await? {
            let Some(ticker) = position.ticker.as_deref() else {
                report.skipped += 1;
                continue;
            };
            if settled_tickers.contains(ticker) {
                continue;
            }
            if listed.contains(ticker) {
                report.still_open += 1;
                continue;
            }

            match feed.market_status(ticker).await {
                Ok(MarketStatus::Open) => report.still_open += 1,
                Ok(MarketStatus::Settled { won }) => {
                    let (exit, result) = settlement_price(won);
                    let closed = self.close_manual_positions_by_ticker(ticker, exit).await?;
                    info!(ticker, closed, result = %result, "Manual positions settled");
                    report.settled += closed as usize;
                    settled_tickers.insert(ticker.to_string());
                }
                Err(e) => {
                    warn!(ticker, error = %e, "Manual settlement lookup failed");
                    report.errors.push(SettlementError {
                        ticker: ticker.to_string(),
                        error: e.to_string(),
                    });
                    report.still_open += 1;
                }
            }
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn position_from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        ticker: row.try_get("ticker")?,
        player_name: row.try_get("player_name")?,
        market_type: row.try_get::<String, _>("market_type")?.parse()?,
        entry_price: row.try_get("entry_price")?,
        entry_edge: row.try_get("entry_edge")?,
        entry_timestamp: row.try_get("entry_timestamp")?,
        tournament_name: row.try_get("tournament_name")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        exit_price: row.try_get("exit_price")?,
        exit_timestamp: row.try_get("exit_timestamp")?,
        profit: row.try_get("profit_loss")?,
    })
}

fn manual_from_row(row: &SqliteRow) -> Result<ManualPosition> {
    Ok(ManualPosition {
        id: row.try_get("id")?,
        ticker: row.try_get("ticker")?,
        player_name: row.try_get("player_name")?,
        market_type: row.try_get::<String, _>("market_type")?.parse()?,
        entry_price: row.try_get("entry_price")?,
        quantity: opt_u32(row, "quantity")?.unwrap_or(1),
        notes: row.try_get("notes")?,
        entry_timestamp: row.try_get("entry_timestamp")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        exit_price: row.try_get("exit_price")?,
        exit_timestamp: row.try_get("exit_timestamp")?,
        profit: row.try_get("profit_loss")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
