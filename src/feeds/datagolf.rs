//! Data Golf model feed.
//!
//! API docs: https://datagolf.com/api-access
//! Base URL: https://feeds.datagolf.com
//! Auth: `key` query parameter.
//!
//! Payloads vary by endpoint (a bare list, or an object wrapping `data` /
//! `players`), and numeric fields arrive as numbers or strings. Everything
//! is normalised here into the typed records in `crate::types`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{normalize_player_name, ModelFeed};
use crate::config::ModelFeedConfig;
use crate::types::{
    BookOdds, FairwayError, InPlaySnapshot, LeaderboardEntry, MarketType, PlayerProbabilities,
    PreTournament, SkillBreakdown,
};

const FEED_NAME: &str = "datagolf";

const IN_PLAY_PATH: &str = "/preds/in-play";
const PRE_TOURNAMENT_PATH: &str = "/preds/pre-tournament";
const BOOK_ODDS_PATH: &str = "/betting-tools/outrights";
const SKILL_PATH: &str = "/preds/player-decompositions";

/// Keys in a book-odds row that are not sportsbooks.
const NON_BOOK_KEYS: &[&str] = &["player_name", "dg_id", "player_id", "datagolf", "dg"];

/// Position used for cut, withdrawn, or unparseable placings.
const UNKNOWN_POSITION: u32 = 999;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged, bound(deserialize = "T: DeserializeOwned"))]
enum Payload<T> {
    List(Vec<T>),
    Wrapped(Wrapped<T>),
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Wrapped<T> {
    #[serde(default, alias = "players", alias = "odds", alias = "baseline_history_fit")]
    data: Vec<T>,
    #[serde(default, alias = "tournament")]
    event_name: Option<String>,
    #[serde(default)]
    info: Option<EventInfo>,
}

#[derive(Debug, Deserialize)]
struct EventInfo {
    #[serde(default)]
    event_name: Option<String>,
}

impl<T> Payload<T> {
    fn into_parts(self) -> (Option<String>, Vec<T>) {
        match self {
            Payload::List(rows) => (None, rows),
            Payload::Wrapped(w) => {
                let name = w
                    .event_name
                    .or_else(|| w.info.and_then(|i| i.event_name))
                    .filter(|n| !n.is_empty());
                (name, w.data)
            }
        }
    }
}

/// One player row from the in-play or pre-tournament endpoints.
#[derive(Debug, Deserialize)]
struct PlayerRow {
    #[serde(default)]
    player_name: Option<String>,
    #[serde(default)]
    win: Option<Value>,
    #[serde(default)]
    top_5: Option<Value>,
    #[serde(default)]
    top_10: Option<Value>,
    #[serde(default)]
    top_20: Option<Value>,
    #[serde(default)]
    make_cut: Option<Value>,
    #[serde(default)]
    current_pos: Option<Value>,
    #[serde(default)]
    current_score: Option<Value>,
    #[serde(default)]
    round: Option<Value>,
    #[serde(default)]
    thru: Option<Value>,
}

impl PlayerRow {
    fn name(&self) -> Option<String> {
        self.player_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(normalize_player_name)
    }

    /// Probabilities arrive as fractions; stored in percent.
    fn probabilities(&self) -> PlayerProbabilities {
        PlayerProbabilities {
            win: number(&self.win) * 100.0,
            top_5: number(&self.top_5) * 100.0,
            top_10: number(&self.top_10) * 100.0,
            top_20: number(&self.top_20) * 100.0,
            make_cut: number(&self.make_cut) * 100.0,
        }
    }

    fn leaderboard_entry(&self) -> LeaderboardEntry {
        let round = number(&self.round) as u32;
        LeaderboardEntry {
            position: parse_position(self.current_pos.as_ref()),
            score_to_par: number(&self.current_score) as i32,
            round: if round == 0 { 1 } else { round },
            thru: parse_thru(self.thru.as_ref()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SkillRow {
    #[serde(default)]
    player_name: Option<String>,
    #[serde(default)]
    sg_ott: Option<Value>,
    #[serde(default)]
    sg_app: Option<Value>,
    #[serde(default)]
    sg_arg: Option<Value>,
    #[serde(default)]
    sg_putt: Option<Value>,
    #[serde(default)]
    sg_total: Option<Value>,
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Numeric value from a number or numeric string; 0.0 otherwise.
fn number(value: &Option<Value>) -> f64 {
    optional_number(value).unwrap_or(0.0)
}

fn optional_number(value: &Option<Value>) -> Option<f64> {
    value.as_ref().and_then(value_number)
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// "T5" → 5, "1" → 1, "CUT"/"WD"/missing → 999.
fn parse_position(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().map(|p| p as u32).unwrap_or(UNKNOWN_POSITION),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('T')
            .parse()
            .unwrap_or(UNKNOWN_POSITION),
        _ => UNKNOWN_POSITION,
    }
}

/// Holes completed; "F" means the round is finished.
fn parse_thru(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("F") => 18,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<(Option<String>, Vec<T>)> {
    if body.is_null() || body.as_object().is_some_and(|o| o.is_empty()) {
        return Ok((None, Vec::new()));
    }
    let payload: Payload<T> = serde_json::from_value(body).map_err(|e| FairwayError::Feed {
        source_name: FEED_NAME.to_string(),
        message: format!("unexpected payload shape: {e}"),
    })?;
    Ok(payload.into_parts())
}

pub(crate) fn parse_in_play(body: Value) -> Result<InPlaySnapshot> {
    let (tournament_name, rows) = decode::<PlayerRow>(body)?;
    let mut snapshot = InPlaySnapshot {
        tournament_name,
        ..Default::default()
    };

    for row in rows {
        let Some(name) = row.name() else { continue };
        snapshot.probabilities.insert(name.clone(), row.probabilities());
        snapshot.leaderboard.insert(name, row.leaderboard_entry());
    }

    Ok(snapshot)
}

pub(crate) fn parse_pre_tournament(body: Value) -> Result<PreTournament> {
    let (tournament_name, rows) = decode::<PlayerRow>(body)?;
    let players = rows
        .into_iter()
        .filter_map(|row| row.name().map(|name| (name, row.probabilities())))
        .collect();

    Ok(PreTournament {
        tournament_name: tournament_name.unwrap_or_default(),
        players,
    })
}

pub(crate) fn parse_book_odds(body: Value) -> Result<BookOdds> {
    let (_, rows) = decode::<serde_json::Map<String, Value>>(body)?;
    let mut odds = BookOdds::new();

    for row in rows {
        let Some(name) = row
            .get("player_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(normalize_player_name)
        else {
            continue;
        };

        let books: HashMap<String, f64> = row
            .iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .filter(|(key, _)| !NON_BOOK_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| {
                value_number(value).filter(|p| *p > 0.0).map(|p| (key, p))
            })
            .collect();

        if !books.is_empty() {
            odds.insert(name, books);
        }
    }

    Ok(odds)
}

pub(crate) fn parse_skills(body: Value) -> Result<HashMap<String, SkillBreakdown>> {
    let (_, rows) = decode::<SkillRow>(body)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let name = row
                .player_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(normalize_player_name)?;
            Some((
                name,
                SkillBreakdown {
                    sg_ott: optional_number(&row.sg_ott),
                    sg_app: optional_number(&row.sg_app),
                    sg_arg: optional_number(&row.sg_arg),
                    sg_putt: optional_number(&row.sg_putt),
                    sg_total: optional_number(&row.sg_total),
                },
            ))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DataGolfClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    tour: String,
}

impl DataGolfClient {
    pub fn new(config: &ModelFeedConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("FAIRWAY/0.1.0 (golf-market-scanner)")
            .build()
            .context("Failed to build HTTP client for Data Golf")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            tour: config.tour.clone(),
        })
    }

    async fn get_json(&self, path: &str, extra: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(path, "Fetching Data Golf feed");

        let mut query: Vec<(&str, &str)> = vec![
            ("tour", self.tour.as_str()),
            ("file_format", "json"),
            ("key", self.api_key.expose_secret().as_str()),
        ];
        query.extend_from_slice(extra);

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Data Golf request failed: {path}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FairwayError::Feed {
                source_name: FEED_NAME.to_string(),
                message: format!("HTTP {status} from {path}"),
            }
            .into());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to decode Data Golf response: {path}"))
    }
}

#[async_trait]
impl ModelFeed for DataGolfClient {
    async fn in_play(&self) -> Result<InPlaySnapshot> {
        let body = self.get_json(IN_PLAY_PATH, &[("odds_format", "percent")]).await?;
        let snapshot = parse_in_play(body)?;
        if snapshot.is_empty() {
            info!("Data Golf returned no live players");
        } else {
            info!(players = snapshot.probabilities.len(), "Live probabilities loaded");
        }
        Ok(snapshot)
    }

    async fn pre_tournament(&self) -> Result<PreTournament> {
        let body = self
            .get_json(PRE_TOURNAMENT_PATH, &[("odds_format", "percent")])
            .await?;
        let pre = parse_pre_tournament(body)?;
        info!(
            players = pre.players.len(),
            tournament = %pre.tournament_name,
            "Pre-tournament probabilities loaded"
        );
        Ok(pre)
    }

    async fn book_odds(&self, market_type: MarketType) -> Result<BookOdds> {
        let body = self
            .get_json(
                BOOK_ODDS_PATH,
                &[
                    ("market", market_type.probability_key()),
                    ("odds_format", "implied_prob"),
                ],
            )
            .await?;
        let odds = parse_book_odds(body)?;
        if odds.is_empty() {
            warn!(market_type = %market_type, "No book odds returned");
        }
        Ok(odds)
    }

    async fn skill_breakdown(&self) -> Result<HashMap<String, SkillBreakdown>> {
        let body = self.get_json(SKILL_PATH, &[]).await?;
        parse_skills(body)
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
