//! Tournament phase detection.
//!
//! Classifies the current state of the tournament from feed freshness and
//! leaderboard progress. Stateless: recomputed every cycle.

use serde::Serialize;
use std::collections::HashMap;

use crate::types::{InPlaySnapshot, LeaderboardEntry, Phase, PreTournament};

/// Holes in a completed round.
const HOLES_PER_ROUND: u32 = 18;

/// Phase plus the context it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TournamentState {
    pub phase: Phase,
    pub tournament_name: Option<String>,
    /// Modal round across the leaderboard; 0 when unknown.
    pub round_num: u32,
}

/// Classify the tournament phase.
pub fn detect_phase(
    in_play: &InPlaySnapshot,
    pre_tournament: Option<&PreTournament>,
) -> TournamentState {
    if in_play.is_empty() {
        let phase = match pre_tournament {
            Some(pre) if pre.has_players() => Phase::PreTournament,
            _ => Phase::Idle,
        };
        return TournamentState {
            phase,
            tournament_name: pre_tournament
                .map(|p| p.tournament_name.clone())
                .filter(|n| !n.is_empty()),
            round_num: 0,
        };
    }

    let leaderboard = &in_play.leaderboard;
    let round_num = modal_round(leaderboard);

    TournamentState {
        phase: classify_live(leaderboard, round_num),
        tournament_name: in_play.tournament_name.clone(),
        round_num,
    }
}

fn classify_live(leaderboard: &HashMap<String, LeaderboardEntry>, round_num: u32) -> Phase {
    let entries = || leaderboard.values();

    let weekend_done = entries()
        .filter(|e| e.round >= 3)
        .all(|e| e.round >= 4 && e.thru >= HOLES_PER_ROUND);
    if round_num >= 4 && weekend_done {
        return Phase::Finished;
    }

    if entries().any(|e| e.thru > 0 && e.thru < HOLES_PER_ROUND) {
        return Phase::LiveRound;
    }

    let mut current = entries().filter(|e| e.round == round_num).peekable();
    if current.peek().is_some() && current.all(|e| e.thru >= HOLES_PER_ROUND) {
        return Phase::BetweenRounds;
    }

    Phase::LiveRound
}

/// Most common round on the leaderboard. Ties go to the later round.
pub fn modal_round(leaderboard: &HashMap<String, LeaderboardEntry>) -> u32 {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for entry in leaderboard.values() {
        *counts.entry(entry.round).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(ra, ca), (rb, cb)| ca.cmp(cb).then(ra.cmp(rb)))
        .map(|(round, _)| round)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
