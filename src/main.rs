//! # Secret Sync Controller
//!
//! A Kubernetes controller that mirrors labelled secrets into every namespace.
//!
//! ## Overview
//!
//! 1. **Watching sources** - Secrets labelled `kss-operator/sync=sync` (configurable)
//! 2. **Fan-out** - Each source is written into every other namespace as a mirror
//!    labelled `kss-operator/sync=synced`
//! 3. **Updates and removal** - Mirrors are replaced when the source changes and
//!    deleted when the source is deleted or loses its label
//! 4. **New namespaces** - Namespaces created later receive every existing source
//!
//! ## Usage
//!
//! ```text
//! secret-sync-controller            # settings from the environment
//! secret-sync-controller -A         # watch sources in all namespaces
//! secret-sync-controller -n ops     # only secrets in `ops` are sources
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use secret_sync_controller::config::ControllerConfig;
use secret_sync_controller::observability;
use secret_sync_controller::runtime::initialization::{init_tracing, initialize};
use secret_sync_controller::runtime::watch_loop::run_watch_loop;

/// Mirror labelled secrets into every namespace
#[derive(Parser, Debug)]
#[command(name = "secret-sync-controller", version)]
struct Args {
    /// Watch source secrets in all namespaces
    #[arg(short = 'A', long, conflicts_with = "namespace")]
    all_namespaces: bool,

    /// Only treat secrets in this namespace as sources (mirrors are still written everywhere)
    #[arg(short, long)]
    namespace: Option<String>,
}

impl Args {
    /// Flags win over the environment
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if self.all_namespaces {
            config.watch_all_namespaces = true;
        }
        if let Some(namespace) = self.namespace {
            config.watch_all_namespaces = false;
            config.controller_namespace = namespace;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.apply(ControllerConfig::from_env());
    config.validate().context("Invalid controller configuration")?;

    let otel_tracer_provider = init_tracing()?;
    let init = initialize(config, otel_tracer_provider).await?;

    let result = run_watch_loop(
        init.secrets,
        init.namespaces,
        init.reconciler,
        init.server_state,
    )
    .await;

    observability::otel::shutdown_otel(init.otel_tracer_provider);
    info!("Secret Sync Controller exited");
    result
}
