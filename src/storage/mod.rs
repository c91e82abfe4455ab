//! Persistence layer: the position ledger.
//!
//! A SQLite database (through a `sqlx` pool) holding opportunities,
//! decisions, outcomes, positions, manual positions, and CLV rows. Each
//! operation checks out a pooled connection for its own duration only.
//! Lifecycle invariants are enforced by the schema: a partial unique index
//! allows one OPEN position per ticker, and outcomes are unique per
//! opportunity.

pub mod positions;
pub mod stats;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{
    AgentVerdict, Decision, Opportunity, OpportunityDraft, Outcome, OutcomeResult, Phase,
};

pub use positions::{ExitReason, ExitRules, OpenOutcome, SettlementReport};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS opportunities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        player_name TEXT NOT NULL,
        market_ticker TEXT NOT NULL,
        market_type TEXT NOT NULL,
        model_prob REAL NOT NULL,
        implied_prob REAL NOT NULL,
        edge_pct REAL NOT NULL,
        leaderboard_position INTEGER,
        score_to_par INTEGER,
        round_number INTEGER,
        holes_completed INTEGER,
        phase TEXT NOT NULL,
        tournament_name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        opportunity_id INTEGER NOT NULL REFERENCES opportunities(id),
        decision TEXT NOT NULL CHECK(decision IN ('BET', 'PASS', 'WATCH')),
        reasoning TEXT NOT NULL,
        confidence REAL NOT NULL,
        suggested_stake_pct REAL NOT NULL,
        phase TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outcomes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        opportunity_id INTEGER NOT NULL UNIQUE REFERENCES opportunities(id),
        result TEXT NOT NULL CHECK(result IN ('WIN', 'LOSS', 'PUSH', 'PENDING')),
        final_position INTEGER,
        timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        opportunity_id INTEGER REFERENCES opportunities(id),
        ticker TEXT NOT NULL,
        player_name TEXT NOT NULL,
        market_type TEXT NOT NULL,
        entry_price REAL NOT NULL,
        entry_edge REAL NOT NULL,
        entry_timestamp TEXT NOT NULL,
        tournament_name TEXT,
        exit_price REAL,
        exit_timestamp TEXT,
        profit_loss REAL,
        status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'CLOSED'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clv_tracking (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker TEXT NOT NULL UNIQUE,
        player_name TEXT NOT NULL,
        market_type TEXT NOT NULL,
        entry_price REAL NOT NULL,
        closing_price REAL,
        clv_cents REAL,
        settlement_price REAL,
        outcome TEXT,
        timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS manual_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker TEXT,
        player_name TEXT NOT NULL,
        market_type TEXT NOT NULL,
        entry_price REAL NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1,
        notes TEXT,
        entry_timestamp TEXT NOT NULL,
        exit_price REAL,
        exit_timestamp TEXT,
        profit_loss REAL,
        status TEXT NOT NULL DEFAULT 'OPEN' CHECK(status IN ('OPEN', 'CLOSED'))
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_open_ticker ON positions(ticker) WHERE status = 'OPEN'",
    "CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)",
    "CREATE INDEX IF NOT EXISTS idx_opp_player ON opportunities(player_name)",
    "CREATE INDEX IF NOT EXISTS idx_opp_market_type ON opportunities(market_type)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_decision ON decisions(decision)",
    "CREATE INDEX IF NOT EXISTS idx_manual_status ON manual_positions(status)",
];

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Durable store of the pipeline's records. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        let ledger = Self { pool };
        ledger.init().await?;
        info!(url, "Ledger ready");
        Ok(ledger)
    }

    /// A private in-memory ledger, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection that never expires keeps the database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply ledger schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- Opportunities ---------------------------------------------------

    /// Persist an opportunity snapshot. Opportunities are never mutated.
    pub async fn record_opportunity(&self, draft: &OpportunityDraft) -> Result<Opportunity> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO opportunities (
                timestamp, player_name, market_ticker, market_type, model_prob,
                implied_prob, edge_pct, leaderboard_position, score_to_par,
                round_number, holes_completed, phase, tournament_name
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(&draft.player_name)
        .bind(&draft.ticker)
        .bind(draft.market_type.as_str())
        .bind(draft.model_prob)
        .bind(draft.implied_prob)
        .bind(draft.edge_pct)
        .bind(draft.position.map(i64::from))
        .bind(draft.score_to_par.map(i64::from))
        .bind(draft.round.map(i64::from))
        .bind(draft.holes_completed.map(i64::from))
        .bind(draft.phase.as_str())
        .bind(&draft.tournament_name)
        .execute(&self.pool)
        .await
        .context("Failed to insert opportunity")?;

        let id = result.last_insert_rowid();
        debug!(id, ticker = %draft.ticker, edge = draft.edge_pct, "Opportunity recorded");

        Ok(Opportunity {
            id,
            timestamp: now,
            fields: draft.clone(),
        })
    }

    pub async fn opportunity(&self, id: i64) -> Result<Option<Opportunity>> {
        let row = sqlx::query("SELECT * FROM opportunities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load opportunity")?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    pub async fn recent_opportunities(&self, limit: i64) -> Result<Vec<Opportunity>> {
        let rows = sqlx::query("SELECT * FROM opportunities ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load opportunities")?;
        rows.iter().map(opportunity_from_row).collect()
    }

    // -- Decisions -------------------------------------------------------

    /// Persist the decision for an opportunity.
    pub async fn record_decision(
        &self,
        opportunity_id: i64,
        verdict: &AgentVerdict,
        phase: Phase,
    ) -> Result<Decision> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO decisions (
                opportunity_id, decision, reasoning, confidence,
                suggested_stake_pct, phase, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(opportunity_id)
        .bind(verdict.verdict.as_str())
        .bind(&verdict.reasoning)
        .bind(verdict.confidence)
        .bind(verdict.stake_pct)
        .bind(phase.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert decision")?;

        Ok(Decision {
            id: result.last_insert_rowid(),
            opportunity_id,
            verdict: verdict.verdict,
            confidence: verdict.confidence,
            stake_pct: verdict.stake_pct,
            reasoning: verdict.reasoning.clone(),
            phase,
            timestamp: now,
        })
    }

    pub async fn decisions_for(&self, opportunity_id: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions WHERE opportunity_id = ? ORDER BY id")
            .bind(opportunity_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load decisions")?;
        rows.iter().map(decision_from_row).collect()
    }

    // -- Outcomes --------------------------------------------------------

    /// Record the result of an opportunity. Returns false when one was
    /// already recorded.
    pub async fn record_outcome(
        &self,
        opportunity_id: i64,
        result: OutcomeResult,
        final_position: Option<u32>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO outcomes (opportunity_id, result, final_position, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(opportunity_id)
        .bind(result.as_str())
        .bind(final_position.map(i64::from))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert outcome")?;

        let inserted = res.rows_affected() == 1;
        if !inserted {
            debug!(opportunity_id, "Outcome already recorded");
        }
        Ok(inserted)
    }

    pub async fn outcome_for(&self, opportunity_id: i64) -> Result<Option<Outcome>> {
        let row = sqlx::query("SELECT * FROM outcomes WHERE opportunity_id = ?")
            .bind(opportunity_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load outcome")?;

        row.map(|row| -> Result<Outcome> {
            Ok(Outcome {
                id: row.try_get("id")?,
                opportunity_id: row.try_get("opportunity_id")?,
                result: row.try_get::<String, _>("result")?.parse()?,
                final_position: opt_u32(&row, "final_position")?,
                timestamp: row.try_get("timestamp")?,
            })
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn opt_u32(row: &SqliteRow, column: &str) -> Result<Option<u32>> {
    let value: Option<i64> = row.try_get(column)?;
    Ok(value.and_then(|v| u32::try_from(v).ok()))
}

fn opportunity_from_row(row: &SqliteRow) -> Result<Opportunity> {
    let score: Option<i64> = row.try_get("score_to_par")?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;

    Ok(Opportunity {
        id: row.try_get("id")?,
        timestamp,
        fields: OpportunityDraft {
            player_name: row.try_get("player_name")?,
            ticker: row.try_get("market_ticker")?,
            market_type: row.try_get::<String, _>("market_type")?.parse()?,
            model_prob: row.try_get("model_prob")?,
            implied_prob: row.try_get("implied_prob")?,
            edge_pct: row.try_get("edge_pct")?,
            position: opt_u32(row, "leaderboard_position")?,
            score_to_par: score.map(|s| s as i32),
            round: opt_u32(row, "round_number")?,
            holes_completed: opt_u32(row, "holes_completed")?,
            phase: row.try_get::<String, _>("phase")?.parse()?,
            tournament_name: row.try_get("tournament_name")?,
        },
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    Ok(Decision {
        id: row.try_get("id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        verdict: row.try_get::<String, _>("decision")?.parse()?,
        confidence: row.try_get("confidence")?,
        stake_pct: row.try_get("suggested_stake_pct")?,
        reasoning: row.try_get("reasoning")?,
        phase: row.try_get::<String, _>("phase")?.parse()?,
        timestamp: row.try_get("timestamp")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
