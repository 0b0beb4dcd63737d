//! # Runtime
//!
//! Controller runtime: initialization, the watch loop, and watch error policy.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
