//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.
//!
//! The configuration is built once at startup and handed to the reconciler as
//! an `Arc<ControllerConfig>`; reconciliation code never reads the environment.

use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT,
    DEFAULT_MIRROR_LABEL_VALUE, DEFAULT_SYNC_LABEL_KEY, DEFAULT_SYNC_LABEL_VALUE,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sync label key must not be empty")]
    EmptyLabelKey,
    #[error("invalid label key '{0}'")]
    InvalidLabelKey(String),
    #[error("invalid label value '{0}'")]
    InvalidLabelValue(String),
    #[error("mirror label value '{0}' must differ from the sync label value")]
    MirrorValueIsSentinel(String),
    #[error("max concurrent reconciliations must be at least 1")]
    ZeroConcurrency,
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Label key recognised on source secrets (and written on mirrors)
    pub sync_label_key: String,
    /// Label value that opts a secret into replication
    pub sync_label_value: String,
    /// Label value written on mirrors
    pub mirror_label_value: String,
    /// Watch source secrets in every namespace (otherwise only `controller_namespace`)
    pub watch_all_namespaces: bool,
    /// Namespace where the controller is deployed
    pub controller_namespace: String,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Maximum number of per-secret fan-outs running at once
    pub max_concurrent_reconciliations: usize,
    /// Skip the delete+create of a mirror whose data and type already match
    pub skip_unchanged_mirrors: bool,
    /// Delay before resuming a watch after an unclassified error (seconds)
    pub watch_restart_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_label_key: DEFAULT_SYNC_LABEL_KEY.to_string(),
            sync_label_value: DEFAULT_SYNC_LABEL_VALUE.to_string(),
            mirror_label_value: DEFAULT_MIRROR_LABEL_VALUE.to_string(),
            watch_all_namespaces: true,
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            skip_unchanged_mirrors: false,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            sync_label_key: string_or(&lookup, "SYNC_LABEL_KEY", defaults.sync_label_key),
            sync_label_value: string_or(&lookup, "SYNC_LABEL_VALUE", defaults.sync_label_value),
            mirror_label_value: string_or(
                &lookup,
                "MIRROR_LABEL_VALUE",
                defaults.mirror_label_value,
            ),
            watch_all_namespaces: bool_or(
                &lookup,
                "WATCH_ALL_NAMESPACES",
                defaults.watch_all_namespaces,
            ),
            controller_namespace: string_or(
                &lookup,
                "POD_NAMESPACE",
                defaults.controller_namespace,
            ),
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            max_concurrent_reconciliations: parse_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            skip_unchanged_mirrors: bool_or(
                &lookup,
                "SKIP_UNCHANGED_MIRRORS",
                defaults.skip_unchanged_mirrors,
            ),
            watch_restart_delay_secs: parse_or(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
        }
    }

    /// Label selector matching source secrets (`key=value`)
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!("{}={}", self.sync_label_key, self.sync_label_value)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Check the configuration before the controller starts
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_label_key.is_empty() {
            return Err(ConfigError::EmptyLabelKey);
        }
        if !is_valid_label_key(&self.sync_label_key) {
            return Err(ConfigError::InvalidLabelKey(self.sync_label_key.clone()));
        }
        for value in [&self.sync_label_value, &self.mirror_label_value] {
            if !is_valid_label_value(value) {
                return Err(ConfigError::InvalidLabelValue(value.clone()));
            }
        }
        if self.mirror_label_value == self.sync_label_value {
            return Err(ConfigError::MirrorValueIsSentinel(
                self.mirror_label_value.clone(),
            ));
        }
        if self.max_concurrent_reconciliations == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// `[prefix/]name` where prefix is a DNS subdomain and name is a label value
/// of at most 63 characters that is not empty.
fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= 253
            && prefix.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                    && !part.starts_with('-')
                    && !part.ends_with('-')
            });
        if !valid_prefix {
            return false;
        }
    }
    !name.is_empty() && is_valid_label_value(name)
}

/// Empty, or at most 63 alphanumerics, `-`, `_`, `.`, starting and ending
/// with an alphanumeric.
fn is_valid_label_value(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric())
}

fn string_or<F>(lookup: &F, key: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}
