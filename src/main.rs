//! FAIRWAY: golf prediction-market edge scanner.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the ledger, wires the feeds, agent, and alert sink into the
//! orchestrator, starts the status API, and runs the cycle loop until
//! Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use fairway::alerts::{CooldownSink, LogAlertSink};
use fairway::config::AppConfig;
use fairway::dashboard::{self, routes::DashboardState};
use fairway::engine::orchestrator::Orchestrator;
use fairway::engine::Services;
use fairway::feeds::datagolf::DataGolfClient;
use fairway::feeds::kalshi::KalshiClient;
use fairway::llm::anthropic::AnthropicAgent;
use fairway::llm::{DecisionAgent, UnavailableAgent};
use fairway::storage::Ledger;

const BANNER: &str = r#"
  ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
   F A I R W A Y
   Golf prediction-market edge scanner
   v0.1.0
  ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("FAIRWAY_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        bankroll = cfg.agent.bankroll,
        base_min_edge = cfg.scanner.base_min_edge,
        "FAIRWAY starting up"
    );

    // -- Initialise components -------------------------------------------

    let ledger = Ledger::connect(&cfg.agent.database_url).await?;

    let model_key = AppConfig::resolve_secret(&cfg.model_feed.api_key_env)?;
    let model = DataGolfClient::new(&cfg.model_feed, model_key)?;
    let market = KalshiClient::new(&cfg.market_feed)?;

    let agent: Arc<dyn DecisionAgent> = match AppConfig::resolve_secret(&cfg.llm.api_key_env) {
        Ok(key) => {
            info!(model = %cfg.llm.model, "Using Anthropic decision agent");
            Arc::new(AnthropicAgent::new(&cfg.llm, key)?)
        }
        Err(_) => {
            warn!(
                env = %cfg.llm.api_key_env,
                "No LLM API key configured, every opportunity gets the fallback verdict"
            );
            Arc::new(UnavailableAgent)
        }
    };

    let services = Services {
        model: Arc::new(model),
        market: Arc::new(market),
        agent,
        alerts: Arc::new(CooldownSink::new(LogAlertSink, cfg.alerts.cooldown_minutes)),
        ledger: ledger.clone(),
    };
    let orchestrator = Orchestrator::new(&cfg, services);

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            ledger,
            orchestrator.subscribe(),
            orchestrator.scan_now_handle(),
        ));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");
    orchestrator
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("FAIRWAY shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fairway=info"));

    let json_logging = std::env::var("FAIRWAY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
