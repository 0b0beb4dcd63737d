//! # OpenTelemetry Support
//!
//! Datadog trace export via `datadog-opentelemetry`.
//!
//! Export is enabled only when `DD_API_KEY` is present in the environment.
//! The remaining `DD_*` variables (`DD_SERVICE`, `DD_VERSION`, `DD_ENV`,
//! `DD_SITE`, `DD_TRACE_AGENT_URL`) are read by the exporter itself; missing
//! ones are filled with controller defaults before initialization.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_SERVICE_NAME: &str = "secret-sync-controller";
const DEFAULT_SITE: &str = "datadoghq.com";
const DEFAULT_AGENT_URL: &str = "http://localhost:8126";

/// Tracer provider handle for graceful shutdown
#[derive(Debug)]
pub enum TracerProviderHandle {
    Datadog(opentelemetry_sdk::trace::SdkTracerProvider),
}

/// Initialize OpenTelemetry tracing from the environment
///
/// Returns `Ok(None)` when no exporter is configured.
///
/// # Errors
///
/// Currently infallible; the signature leaves room for exporters whose
/// setup can fail.
pub fn init_otel() -> Result<Option<TracerProviderHandle>> {
    if std::env::var("DD_API_KEY").is_err() {
        if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
            warn!("OTEL_EXPORTER_OTLP_ENDPOINT is set but only Datadog export is supported");
        }
        return Ok(None);
    }

    set_default_env("DD_SERVICE", DEFAULT_SERVICE_NAME);
    set_default_env(
        "DD_VERSION",
        &format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("BUILD_GIT_HASH")),
    );
    set_default_env("DD_SITE", DEFAULT_SITE);
    set_default_env("DD_TRACE_AGENT_URL", DEFAULT_AGENT_URL);

    let tracer_provider = datadog_opentelemetry::tracing().init();

    info!(
        service = std::env::var("DD_SERVICE").unwrap_or_default(),
        version = std::env::var("DD_VERSION").unwrap_or_default(),
        env = std::env::var("DD_ENV").ok(),
        agent = std::env::var("DD_TRACE_AGENT_URL").unwrap_or_default(),
        "Datadog OpenTelemetry tracing initialized"
    );

    Ok(Some(TracerProviderHandle::Datadog(tracer_provider)))
}

// Runs before the runtime spawns any worker that could read the environment.
fn set_default_env(key: &str, value: &str) {
    if std::env::var(key).is_err() {
        std::env::set_var(key, value);
    }
}

/// Shutdown OpenTelemetry tracer provider gracefully
///
/// Flushes pending spans. Call before process exit.
pub fn shutdown_otel(tracer_provider: Option<TracerProviderHandle>) {
    match tracer_provider {
        Some(TracerProviderHandle::Datadog(provider)) => {
            info!("Shutting down Datadog tracer provider...");
            if let Err(e) = provider.shutdown_with_timeout(Duration::from_secs(5)) {
                warn!("Error shutting down Datadog tracer provider: {}", e);
            }
        }
        None => {}
    }
}
