//! # Controller
//!
//! Core controller modules for the Secret Sync Controller.
//!
//! - `filter`: sentinel label predicate and mirror detection
//! - `mirror`: idempotent mirror writes in one namespace
//! - `namespaces`: replication target enumeration
//! - `reconciler`: event handling and fan-out
//! - `server`: HTTP server for metrics and health checks

pub mod filter;
pub mod mirror;
pub mod namespaces;
pub mod reconciler;
pub mod server;
