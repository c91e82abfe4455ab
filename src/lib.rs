//! FAIRWAY: golf prediction-market edge scanner and position tracker.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod feeds;
pub mod llm;
pub mod storage;
pub mod strategy;
pub mod types;
