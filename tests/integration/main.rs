//! Integration test harness.

mod mock_feeds;
mod pipeline;
