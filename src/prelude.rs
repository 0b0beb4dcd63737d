//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use secret_sync_controller::prelude::*;
//! ```

// Cluster boundary
pub use crate::cluster::{ClusterError, ClusterState, KubeClusterState};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    FanOutReport, MirrorOperation, MirrorOutcome, Reconciler, SecretKey, SourceSecret, SyncEvent,
    TargetResult, TrackedSource,
};

// Config types
pub use crate::config::{ConfigError, ControllerConfig};
