//! Integration tests for the PISA watchtower core.
//!
//! Test modules:
//!
//! - `watcher_pipeline_tests`: full-tower scenarios for event watching:
//!   happy watch, confirmed eviction, reorg before response, recurring
//!   events, version supersession, head backfill
//! - `responder_pipeline_tests`: queue promotion, inclusion tracking,
//!   out-of-order delivery, reorg-safe re-broadcast
//! - `mock_infrastructure`: reusable mocks (scripted fork-tree block
//!   source, recording signer, payload-priced gas estimator)
//!
//! Run with:
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod responder_pipeline_tests;

#[cfg(test)]
mod watcher_pipeline_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
