//! Live registry of vessel positions for cargo shipments in transit.
//!
//! Two independent paths feed one store: a long-lived streaming feed client
//! applying incremental updates, and a scheduled reconciliation job polling
//! a REST provider once per vessel per day. Both converge on a single
//! current-position row per vessel plus an append-only position history.

pub mod config;
pub mod database;
pub mod errors;
pub mod feed;
pub mod http;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod registry;
