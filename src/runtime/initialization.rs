//! # Initialization
//!
//! Controller initialization logic including rustls setup, OpenTelemetry,
//! tracing, metrics, server startup, and Kubernetes client setup.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{api::Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cluster::KubeClusterState;
use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{bind, start_server, ServerState};
use crate::observability;

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Source secrets, cluster-wide or in the controller namespace
    pub secrets: Api<Secret>,
    /// All namespaces
    pub namespaces: Api<Namespace>,
    /// Reconciler context
    pub reconciler: Reconciler,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// OpenTelemetry tracer provider (if initialized)
    pub otel_tracer_provider: Option<observability::otel::TracerProviderHandle>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_state", &self.server_state)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber and, when configured, trace export
///
/// Called before anything logs so startup messages are not lost.
///
/// # Errors
///
/// Fails when OpenTelemetry cannot be initialized.
pub fn init_tracing() -> Result<Option<observability::otel::TracerProviderHandle>> {
    let otel_tracer_provider =
        observability::otel::init_otel().context("Failed to initialize OpenTelemetry")?;

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_sync_controller=info".into()),
        )
        .try_init()
    {
        // datadog-opentelemetry may already have installed one
        warn!("Tracing subscriber init returned error: {}", e);
    }

    Ok(otel_tracer_provider)
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Metrics registration
/// - Kubernetes client creation
/// - Reconciler setup
/// - HTTP server startup
///
/// Tracing is set up separately by [`init_tracing`].
///
/// # Errors
///
/// Fails when the probe port cannot be bound or no Kubernetes client can be
/// built from the environment.
pub async fn initialize(
    config: ControllerConfig,
    otel_tracer_provider: Option<observability::otel::TracerProviderHandle>,
) -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features.
    // Fails only if a provider is already installed, which is fine.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Secret Sync Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        sync_label = config.label_selector().as_str(),
        mirror_label_value = config.mirror_label_value.as_str(),
        watch_all_namespaces = config.watch_all_namespaces,
        controller_namespace = config.controller_namespace.as_str(),
        max_concurrent_reconciliations = config.max_concurrent_reconciliations,
        skip_unchanged_mirrors = config.skip_unchanged_mirrors,
        "Controller configuration"
    );

    observability::metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let secrets: Api<Secret> = if config.watch_all_namespaces {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), &config.controller_namespace)
    };
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let cluster = Arc::new(KubeClusterState::new(client.clone()));
    let port = config.metrics_port;
    let reconciler = Reconciler::new(cluster, Arc::new(config));

    // Not ready until the initial secret listing has been applied
    let server_state = Arc::new(ServerState::new(reconciler.clone()));
    let listener = bind(port)
        .await
        .with_context(|| format!("Failed to bind HTTP server on port {port}"))?;
    let server_state_clone = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(listener, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        secrets,
        namespaces,
        reconciler,
        server_state,
        otel_tracer_provider,
    })
}
