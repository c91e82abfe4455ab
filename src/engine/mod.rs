//! Core engine: the per-cycle scan → decide → monitor loop.
//!
//! `scanner` turns markets into recorded decisions and opened positions;
//! `orchestrator` sequences one cycle, publishes its snapshot, and sleeps
//! for the phase-dependent interval.

pub mod orchestrator;
pub mod scanner;

use std::sync::Arc;

use crate::alerts::AlertSink;
use crate::feeds::{MarketFeed, ModelFeed};
use crate::llm::DecisionAgent;
use crate::storage::Ledger;

/// Collaborators shared by the scanner and the orchestrator.
#[derive(Clone)]
pub struct Services {
    pub model: Arc<dyn ModelFeed>,
    pub market: Arc<dyn MarketFeed>,
    pub agent: Arc<dyn DecisionAgent>,
    pub alerts: Arc<dyn AlertSink>,
    pub ledger: Ledger,
}
