//! Secret Sync Controller Library
//!
//! Mirrors secrets carrying the sync label into every other namespace of the
//! cluster and keeps the mirrors current as sources and namespaces change.
//!
//! ## Quick Start
//!
//! ```rust
//! use secret_sync_controller::prelude::*;
//! ```
//!
//! The reconciler talks to the cluster only through [`cluster::ClusterState`],
//! so it can be exercised against an in-memory implementation.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
