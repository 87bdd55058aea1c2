//! # PISA Core
//!
//! Core library for the PISA accountable watchtower: customers delegate the
//! duty of monitoring a contract for an on-chain event during a contractual
//! window, and the tower responds with a pre-authorised transaction when
//! the event fires, correctly even across chain reorganisations.
//!
//! This crate provides:
//!
//! - **[`cache`]**: fork-aware, bounded-depth block storage with ancestry
//!   queries; the single source the whole pipeline reasons against.
//!
//! - **[`chain`]**: the `BlockSource` port and the `BlockProcessor` that
//!   linearises announced heads into cache updates and component dispatch.
//!
//! - **[`components`]**: the reducer-driven anchor-state framework; state
//!   is a pure function of the chain tip, side effects fire on edges only.
//!
//! - **[`store`]**: appointment storage with state-locator versioning.
//!
//! - **[`watcher`]**: per-appointment event detection with confirmation
//!   depths for responding and eviction.
//!
//! - **[`responder`]**: the gas queue, the multi-responder owning the
//!   signing key, the inclusion tracker, and the dedicated miner.
//!
//! - **[`appointment`]**, **[`abi`]**, **[`config`]**, **[`signer`]**: the
//!   wire form and acceptance policy, deterministic encoding, layered
//!   configuration, and the signing/gas ports.
//!
//! ## Architecture
//!
//! ```text
//!  BlockSource ──► BlockProcessor ──► BlockCache (fork-aware)
//!                      │
//!                      │ NEW_HEAD(prev, head), serialised
//!          ┌───────────┼──────────────┐
//!          ▼           ▼              ▼
//!   TransactionTracker Watcher   MultiResponder (reorg pass)
//!          │           │ respond      │ re-enqueue
//!          │ tx_mined  ▼              ▼
//!          └───────► MultiResponder ─► GasQueue ─► Signer
//! ```
//!
//! Everything dispatches on one cooperative loop: the processor is the
//! only driver, component reducers are pure and synchronous, and the only
//! suspension points are signer calls, block fetches, and store writes.

pub mod abi;
pub mod appointment;
pub mod cache;
pub mod chain;
pub mod components;
pub mod config;
pub mod responder;
pub mod runtime;
pub mod signer;
pub mod store;
pub mod types;
pub mod utils;
pub mod watcher;
