//! Kalshi exchange feed.
//!
//! API docs: https://trading-api.readme.io/reference
//! Base URL: https://api.elections.kalshi.com/trade-api/v2
//!
//! Only public market-data endpoints are used (events, order books, market
//! status), so requests are unauthenticated. Prices are integer cents.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::MarketFeed;
use crate::config::MarketFeedConfig;
use crate::types::{FairwayError, Market, MarketStatus, MarketType};

const FEED_NAME: &str = "kalshi";

/// Markets whose title or subtitle mentions this are never listed.
const EXCLUDED_PHRASE: &str = "round leader";

/// Subtitles longer than this are not treated as a player name.
const MAX_SUBTITLE_NAME_WORDS: usize = 4;

const SETTLED_STATUSES: &[&str] = &["settled", "finalized", "closed"];

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<EventRow>,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    #[serde(default)]
    markets: Vec<MarketRow>,
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    ticker: String,
    #[serde(default)]
    event_ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    yes_ask: Option<f64>,
    #[serde(default)]
    yes_bid: Option<f64>,
    #[serde(default)]
    no_ask: Option<f64>,
    #[serde(default)]
    no_bid: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    #[serde(default)]
    orderbook: OrderBook,
}

/// Resting bids on each side, as `[price, quantity]` levels.
/// The exchange sends `null` for an empty side.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OrderBook {
    #[serde(default)]
    pub yes: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub no: Option<Vec<(f64, f64)>>,
}

#[derive(Debug, Deserialize)]
struct MarketDetailResponse {
    market: MarketDetail,
}

#[derive(Debug, Deserialize)]
struct MarketDetail {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Market-type label from the event ticker, falling back to title text.
fn classify_market(event_ticker: &str, lower_text: &str) -> MarketType {
    let ticker = event_ticker.to_uppercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower_text.contains(n));

    if ticker.contains("TOP5") || has(&["top 5", "top five"]) {
        MarketType::Top5
    } else if ticker.contains("TOP10") || has(&["top 10", "top ten"]) {
        MarketType::Top10
    } else if ticker.contains("TOP20") || has(&["top 20", "top twenty"]) {
        MarketType::Top20
    } else if ticker.contains("PGACUT") || has(&["make the cut", "make cut"]) {
        MarketType::MakeCut
    } else {
        MarketType::Winner
    }
}

/// Byte offset of the earliest keyword in `hay`, never at offset 0.
fn first_keyword(hay: &str, keywords: &[&str]) -> Option<usize> {
    let skip = hay.chars().next()?.len_utf8();
    keywords
        .iter()
        .filter_map(|kw| hay[skip..].find(kw).map(|p| p + skip))
        .min()
}

/// "Will Scottie Scheffler win the Masters?" → "Scottie Scheffler".
fn name_after_will(title: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `title`.
    let lower = title.to_ascii_lowercase();
    let mut from = 0;

    while let Some(i) = lower[from..].find("will") {
        let after = from + i + "will".len();
        let rest = &lower[after..];
        let gap = rest.len() - rest.trim_start().len();

        if gap > 0 {
            let start = after + gap;
            if let Some(end) = first_keyword(&lower[start..], &[" win", " finish", " place", " make"]) {
                let name = title[start..start + end].trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
        from = after;
    }
    None
}

/// "Scottie Scheffler to win the Masters" → "Scottie Scheffler".
fn name_before_to(title: &str) -> Option<String> {
    let lower = title.to_ascii_lowercase();
    let end = first_keyword(&lower, &[" to win", " to finish", " to place"])?;
    let name = title[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Extract `(player_name, market_type)` from a listing.
///
/// Returns `None` for round-leader markets and for listings with no
/// recognisable player name.
pub(crate) fn parse_market(title: &str, subtitle: &str, event_ticker: &str) -> Option<(String, MarketType)> {
    let lower = format!("{title} {subtitle}").to_lowercase();
    if lower.contains(EXCLUDED_PHRASE) {
        return None;
    }

    let market_type = classify_market(event_ticker, &lower);

    let name = name_after_will(title)
        .or_else(|| name_before_to(title))
        .or_else(|| {
            let sub = subtitle.trim();
            let words = sub.split_whitespace().count();
            (words > 0 && words <= MAX_SUBTITLE_NAME_WORDS).then(|| sub.to_string())
        })?;

    Some((name, market_type))
}

/// Best price on one side of the book.
fn best_bid(levels: &Option<Vec<(f64, f64)>>) -> Option<f64> {
    levels
        .as_deref()?
        .iter()
        .map(|(price, _)| *price)
        .reduce(f64::max)
}

/// Re-derive quotes from resting bids. An empty side leaves its
/// dependent quotes untouched.
pub(crate) fn apply_orderbook(market: &mut Market, book: &OrderBook) {
    if let Some(no_bid) = best_bid(&book.no) {
        market.yes_ask = 100.0 - no_bid;
        market.no_bid = no_bid;
    }
    if let Some(yes_bid) = best_bid(&book.yes) {
        market.yes_bid = yes_bid;
        market.no_ask = 100.0 - yes_bid;
    }
}

fn status_from_detail(detail: &MarketDetail) -> MarketStatus {
    let status = detail.status.to_lowercase();
    if SETTLED_STATUSES.contains(&status.as_str()) {
        MarketStatus::Settled {
            won: detail.result.eq_ignore_ascii_case("yes"),
        }
    } else {
        MarketStatus::Open
    }
}

fn market_from_row(row: MarketRow) -> Option<Market> {
    if row.status != "open" && row.status != "active" {
        return None;
    }
    // No ask means nobody is selling; nothing to act on.
    let yes_ask = row.yes_ask.filter(|a| *a > 0.0)?;
    let (player_name, market_type) = parse_market(&row.title, &row.subtitle, &row.event_ticker)?;

    Some(Market {
        ticker: row.ticker,
        event_ticker: row.event_ticker,
        title: row.title,
        player_name,
        market_type: market_type.as_str().to_string(),
        yes_ask,
        yes_bid: row.yes_bid.unwrap_or(0.0),
        no_ask: row.no_ask.unwrap_or(0.0),
        no_bid: row.no_bid.unwrap_or(0.0),
    })
}

/// Exponential backoff: `base`, `2·base`, `4·base`, ... saturating at the
/// largest representable delay.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiClient {
    http: Client,
    base_url: String,
    series: Vec<String>,
    max_attempts: u32,
    backoff_base_ms: u64,
    series_pause: Duration,
}

impl KalshiClient {
    pub fn new(config: &MarketFeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("FAIRWAY/0.1.0 (golf-market-scanner)")
            .build()
            .context("Failed to build HTTP client for Kalshi")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            series: config.series.clone(),
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            series_pause: Duration::from_millis(config.series_pause_ms),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(path, "Kalshi request");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Kalshi request failed: {path}"))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(FairwayError::RateLimited {
                source_name: FEED_NAME.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FairwayError::Feed {
                source_name: FEED_NAME.to_string(),
                message: format!("HTTP {status} from {path}: {body}"),
            }
            .into());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to decode Kalshi response: {path}"))
    }

    /// Fetch one series' open events, backing off on rate limits.
    /// Any other failure abandons the series.
    async fn fetch_series(&self, series: &str) -> Option<EventsResponse> {
        let query = [
            ("series_ticker", series),
            ("with_nested_markets", "true"),
            ("status", "open"),
            ("limit", "100"),
        ];

        for attempt in 0..self.max_attempts {
            match self.get_json::<EventsResponse>("/events", &query).await {
                Ok(resp) => return Some(resp),
                Err(e) => {
                    let rate_limited = matches!(
                        e.downcast_ref::<FairwayError>(),
                        Some(FairwayError::RateLimited { .. })
                    );
                    if !rate_limited {
                        error!(series, error = %e, "Failed to fetch series");
                        return None;
                    }
                    if attempt + 1 == self.max_attempts {
                        break;
                    }
                    let wait = backoff_delay(self.backoff_base_ms, attempt);
                    warn!(series, attempt = attempt + 1, wait_ms = wait.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        error!(series, attempts = self.max_attempts, "Giving up on series after repeated rate limits");
        None
    }
}

#[async_trait]
impl MarketFeed for KalshiClient {
    async fn discover_markets(&self) -> Result<Vec<Market>> {
        let mut markets = Vec::new();

        for (i, series) in self.series.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.series_pause).await;
            }

            let Some(resp) = self.fetch_series(series).await else {
                continue;
            };

            let before = markets.len();
            markets.extend(
                resp.events
                    .into_iter()
                    .flat_map(|event| event.markets)
                    .filter_map(market_from_row),
            );
            debug!(series = %series, found = markets.len() - before, "Series scanned");
        }

        info!(markets = markets.len(), "Golf markets discovered");
        Ok(markets)
    }

    async fn refresh_prices(&self, market: &mut Market) -> Result<()> {
        let path = format!("/markets/{}/orderbook", urlencoding::encode(&market.ticker));
        let resp: OrderBookResponse = self.get_json(&path, &[]).await?;
        apply_orderbook(market, &resp.orderbook);
        debug!(
            ticker = %market.ticker,
            yes_ask = market.yes_ask,
            yes_bid = market.yes_bid,
            "Quotes refreshed"
        );
        Ok(())
    }

    async fn market_status(&self, ticker: &str) -> Result<MarketStatus> {
        let path = format!("/markets/{}", urlencoding::encode(ticker));
        let resp: MarketDetailResponse = self.get_json(&path, &[]).await?;
        Ok(status_from_detail(&resp.market))
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
