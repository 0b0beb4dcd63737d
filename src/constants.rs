//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Label and annotation values here are defaults; the sentinel label key and
//! values are overridable through [`crate::config::ControllerConfig`].

/// Default sentinel label key that opts a secret into replication
pub const DEFAULT_SYNC_LABEL_KEY: &str = "kss-operator/sync";

/// Default sentinel label value marking a source secret
pub const DEFAULT_SYNC_LABEL_VALUE: &str = "sync";

/// Default value written under the sync label key on every mirror
/// Must differ from the sentinel value so mirrors are never in scope
pub const DEFAULT_MIRROR_LABEL_VALUE: &str = "synced";

/// Annotation identifying a secret as a mirror, holding its source namespace
pub const SOURCE_NAMESPACE_ANNOTATION: &str = "kss-operator/source-namespace";

/// Annotation holding the unix timestamp (seconds) of the mirror write
pub const SYNCED_AT_ANNOTATION: &str = "kss-operator/synced-at";

/// Default namespace the controller runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kss-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default upper bound on concurrently running per-secret fan-outs
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default delay before resuming a watch after an unknown error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Namespace phase reported while a namespace is being deleted
pub const NAMESPACE_PHASE_TERMINATING: &str = "Terminating";
