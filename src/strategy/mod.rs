//! Strategy primitives: phase detection, edge thresholds and validation,
//! Kelly stake sizing, and player-name matching.
//!
//! Everything here is pure and synchronous; the engine drives it.

pub mod edge;
pub mod kelly;
pub mod matching;
pub mod phase;
