//! Anthropic Claude decision agent.
//!
//! Implements `DecisionAgent` with the Anthropic Messages API. Handles
//! prompt construction, retry with exponential backoff on rate limits and
//! server errors, and parsing of the JSON verdict (fenced or bare).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DecisionAgent, OpportunityContext};
use crate::config::LlmConfig;
use crate::strategy::edge::ValidationConfidence;
use crate::types::{AgentVerdict, FairwayError, Verdict};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

const SYSTEM_PROMPT: &str = "You are a sharp sports betting analyst specializing in PGA golf \
markets on Kalshi.\n\n\
You receive betting opportunities where Data Golf's live predictive model disagrees with the \
market-implied probability. Evaluate each opportunity and decide: BET, PASS, or WATCH.\n\n\
Consider:\n\
- The numerical edge (model probability vs market-implied probability)\n\
- Tournament context: round, holes remaining, leaderboard position\n\
- Model confidence: the model is more reliable late in tournaments when positions are settled\n\
- Market efficiency: thin golf markets misprice more often\n\
- Historical base rates for golfers in this position\n\
- Your own track record, given below\n\n\
Be decisive. A 10% edge in round 4 with 9 holes left is much more actionable than a 15% edge \
in round 1.\n\n\
You MUST respond with valid JSON in exactly this format:\n\
{\"decision\": \"BET\" | \"PASS\" | \"WATCH\", \"confidence\": 0.0-1.0, \
\"suggested_stake_pct\": 0.0-5.0, \"reasoning\": \"2-4 sentence explanation\"}";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// The JSON object the model is asked to return.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    decision: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    suggested_stake_pct: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnthropicAgent {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
}

impl AnthropicAgent {
    pub fn new(config: &LlmConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build Anthropic HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Send a messages request with retry + backoff. Returns the joined text.
    async fn call_api(&self, user_message: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: user_message,
            }],
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying Anthropic API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", self.api_key.expose_secret().as_str())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: MessagesResponse = response
                            .json()
                            .await
                            .context("Failed to parse Anthropic response")?;
                        return Ok(body
                            .content
                            .iter()
                            .filter_map(|b| b.text.as_deref())
                            .collect::<Vec<_>>()
                            .join(""));
                    }

                    // Retryable errors: 429 (rate limit), 500+, 529 (overloaded)
                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "Retryable Anthropic API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Anthropic API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Anthropic request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "Anthropic API failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_default()
        )
    }

    /// Build the user prompt for one opportunity.
    pub fn build_prompt(ctx: &OpportunityContext) -> String {
        let opp = &ctx.opportunity.fields;
        let market_label = opp.market_type.as_str().to_uppercase();
        let mut prompt = String::with_capacity(2000);

        // `write!` into a String cannot fail.
        let _ = writeln!(prompt, "Evaluate this betting opportunity:\n");
        let _ = writeln!(prompt, "**Player:** {}", opp.player_name);
        let _ = writeln!(prompt, "**Market:** {market_label} ({})", opp.ticker);
        let _ = writeln!(prompt, "**Model Probability:** {:.1}%", opp.model_prob * 100.0);
        let _ = writeln!(prompt, "**Market Implied Probability:** {:.1}%", opp.implied_prob * 100.0);
        let _ = writeln!(prompt, "**Edge:** {:+.1}%", opp.edge_pct);
        let _ = writeln!(prompt, "**Phase:** {}", opp.phase);

        if let Some(lb) = &ctx.leaderboard {
            let _ = writeln!(prompt, "\n**Leaderboard Context:**");
            let _ = writeln!(prompt, "- Position: {}", lb.position);
            let _ = writeln!(prompt, "- Score to Par: {:+}", lb.score_to_par);
            let _ = writeln!(prompt, "- Round: {}", lb.round);
            let _ = writeln!(prompt, "- Through: {} holes (of 18)", lb.thru);
            let _ = writeln!(prompt, "- Holes Remaining in Round: {}", 18u32.saturating_sub(lb.thru));
        }

        let tr = &ctx.track_record;
        let _ = writeln!(prompt, "\n**Your Track Record:**");
        let _ = writeln!(
            prompt,
            "- Overall: {}/{} ({:.0}% accuracy)",
            tr.overall.wins,
            tr.overall.total,
            tr.overall.accuracy * 100.0
        );
        let _ = writeln!(
            prompt,
            "- {market_label} bets: {}/{} ({:.0}%)",
            tr.market_type.wins,
            tr.market_type.total,
            tr.market_type.accuracy * 100.0
        );
        let _ = writeln!(
            prompt,
            "- 10%+ edge bets: {}/{} ({:.0}%)",
            tr.large_edge.wins,
            tr.large_edge.total,
            tr.large_edge.accuracy * 100.0
        );

        let v = &ctx.validation;
        let tier = match v.confidence {
            ValidationConfidence::High => "HIGH",
            ValidationConfidence::Medium => "MEDIUM",
            ValidationConfidence::Low => "LOW",
        };
        let _ = writeln!(prompt, "\n**Edge Validation:** {tier} confidence");
        let _ = writeln!(prompt, "- Edge vs market: {:+.1}%", v.edge_vs_market);
        if let Some(e) = v.edge_vs_reference {
            let _ = writeln!(prompt, "- Edge vs Pinnacle: {e:+.1}%");
        }
        if let Some(e) = v.edge_vs_consensus {
            let _ = writeln!(prompt, "- Edge vs Consensus: {e:+.1}%");
        }
        let _ = writeln!(prompt, "- Books checked: {}", v.books_available);

        let s = &ctx.stake;
        let _ = writeln!(prompt, "\n**Kelly Criterion:**");
        let _ = writeln!(prompt, "- Recommended stake: {:.2}% of bankroll", s.stake_pct);
        let _ = writeln!(prompt, "- Breakeven prob: {:.1}%", s.breakeven_pct);
        let _ = writeln!(prompt, "- Edge over breakeven: {:+.1}%", s.edge_over_breakeven);
        let _ = writeln!(prompt, "- Positive EV: {}", if s.is_positive_ev { "Yes" } else { "No" });

        if let Some(sg) = &ctx.skill {
            let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |x| format!("{x:+.2}"));
            let _ = writeln!(prompt, "\n**Strokes Gained (SG:OTT most predictive, SG:PUTT least):**");
            let _ = writeln!(prompt, "- SG:OTT (off tee): {}", fmt(sg.sg_ott));
            let _ = writeln!(prompt, "- SG:APP (approach): {}", fmt(sg.sg_app));
            let _ = writeln!(prompt, "- SG:ARG (around green): {}", fmt(sg.sg_arg));
            let _ = writeln!(prompt, "- SG:PUTT: {}", fmt(sg.sg_putt));
            let _ = writeln!(prompt, "- SG:Total: {}", fmt(sg.sg_total));
        }

        if !tr.recent_bets.is_empty() {
            let _ = writeln!(prompt, "\n**Recent BET decisions on this market type:**");
            for bet in &tr.recent_bets {
                let result = bet.result.map_or("PENDING", |r| r.as_str());
                let _ = writeln!(
                    prompt,
                    "- {}: edge {:+.1}%, result: {result}",
                    bet.player_name, bet.edge_pct
                );
            }
        }

        prompt
    }

    /// Parse the model's JSON verdict. Markdown fences and surrounding
    /// prose are tolerated; an unknown decision label is an error.
    pub fn parse_verdict(text: &str) -> Result<AgentVerdict, FairwayError> {
        let json = extract_json(text)
            .ok_or_else(|| FairwayError::AgentResponse(format!("no JSON object in: {}", preview(text))))?;

        let raw: RawVerdict = serde_json::from_str(json)
            .map_err(|e| FairwayError::AgentResponse(format!("{e}: {}", preview(text))))?;

        let verdict: Verdict = raw
            .decision
            .parse()
            .map_err(|_| FairwayError::AgentResponse(format!("unknown decision {:?}", raw.decision)))?;

        Ok(AgentVerdict {
            verdict,
            confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            stake_pct: raw.suggested_stake_pct.unwrap_or(0.0).max(0.0),
            reasoning: raw.reasoning.trim().to_string(),
        })
    }
}

/// The JSON object inside `text`: a fenced block if present, otherwise the
/// span from the first `{` to the last `}`.
fn extract_json(text: &str) -> Option<&str> {
    let body = match text.split("```").nth(1) {
        Some(fenced) => fenced.strip_prefix("json").unwrap_or(fenced),
        None => text,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

// ---------------------------------------------------------------------------
// DecisionAgent implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl DecisionAgent for AnthropicAgent {
    async fn evaluate(&self, ctx: &OpportunityContext) -> Result<AgentVerdict> {
        let user_msg = Self::build_prompt(ctx);
        let ticker = &ctx.opportunity.fields.ticker;

        debug!(ticker = %ticker, model = %self.model, "Requesting decision");

        let text = self
            .call_api(&user_msg)
            .await
            .context("Anthropic API call failed")?;
        let verdict = Self::parse_verdict(&text)?;

        info!(
            ticker = %ticker,
            verdict = %verdict.verdict,
            confidence = format!("{:.0}%", verdict.confidence * 100.0),
            "Decision received"
        );
        Ok(verdict)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
