//! Chain-log materialization engine for the Gavel auction and governance
//! protocol.
//!
//! This crate turns the ordered stream of protocol events into a relational
//! SQLite store that read-side views can query directly:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  gavel-indexer                      │
//! │                                     │
//! │  ┌──────────────┐                   │
//! │  │ Sync engine  │ ← Ethereum RPC    │
//! │  │ (tokio task) │   token / auction │
//! │  └──────┬───────┘   governor / data │
//! │         │                           │
//! │  ┌──────▼───────┐                   │
//! │  │  Dispatcher  │ per-event upserts │
//! │  └──────┬───────┘                   │
//! │         │                           │
//! │  ┌──────▼───────┐                   │
//! │  │   Storage    │ ← SQLite          │
//! │  └──────┬───────┘                   │
//! │         │                           │
//! │  ┌──────▼────────────┐              │
//! │  │ Settlement resolver│ (periodic)  │
//! │  │ Rewards refresher  │ (periodic)  │
//! │  └────────────────────┘             │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Separation of concerns
//!
//! - **listener**: RPC log fetching, event decoding, sync loop
//! - **handlers**: maps decoded events onto idempotent store writes
//! - **storage**: SQLite schema and upsert discipline
//! - **settlement**: settlement-attribution resolver
//! - **rewards**: authoritative on-chain client balance refresh
//! - **namecache**: three-tier address-to-name resolution
//! - **views**: read-only projections for consumers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handlers;
pub mod listener;
pub mod namecache;
pub mod rewards;
pub mod settlement;
pub mod storage;
pub mod views;

pub use gavel_core::{attribution, error::EngineError, types::*};
