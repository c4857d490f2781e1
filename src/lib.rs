//! Market-state reconciliation engine for a derivatives exchange's realtime
//! feed: a single-writer state machine that fuses an incremental websocket
//! action stream with periodic REST-backed reloads into a consistent view
//! of the contract catalogue, per-contract order books, the operator's own
//! positions and cost basis, and per-asset account balances.
//!
//! `main.rs` wires this library's `SessionController` to a real
//! `HttpRestClient` and `TungsteniteFeed`; `tests/scenarios.rs` exercises
//! the same `MarketState`/`dispatch_action` surface directly, with no
//! network involved.

pub mod action;
pub mod analytics;
pub mod book;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod feed;
pub mod ids;
pub mod ledger;
pub mod position;
pub mod rest;
pub mod session;
pub mod state;
