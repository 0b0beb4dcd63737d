//! # Watch Loop
//!
//! Watches source secrets and namespaces, translates watcher events into
//! [`SyncEvent`]s and hands them to the reconciler.
//!
//! A watcher re-list (startup, or recovery from an expired resource version)
//! is a resync: every listed source is applied again, and sources or
//! namespaces that vanished while the watch was down are reported as removed.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::Api;
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::is_terminating;
use crate::controller::reconciler::{Reconciler, SecretKey, SyncEvent};
use crate::controller::server::ServerState;
use crate::runtime::error_policy::handle_watch_stream_error;

/// Turns secret watcher events into reconciler events
#[derive(Debug, Default)]
pub struct SecretFeed {
    known: BTreeSet<SecretKey>,
    relisting: Option<BTreeSet<SecretKey>>,
}

impl SecretFeed {
    pub fn translate(&mut self, event: Event<Secret>) -> Vec<SyncEvent> {
        match event {
            Event::Init => {
                self.relisting = Some(BTreeSet::new());
                Vec::new()
            }
            Event::InitApply(secret) => {
                let Some(key) = SecretKey::from_secret(&secret) else {
                    return Vec::new();
                };
                self.relisting
                    .get_or_insert_with(BTreeSet::new)
                    .insert(key.clone());
                self.known.insert(key);
                vec![SyncEvent::SecretUpserted(secret)]
            }
            Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let vanished: Vec<SecretKey> = self.known.difference(&seen).cloned().collect();
                self.known = seen;
                vanished.into_iter().map(SyncEvent::SecretRemoved).collect()
            }
            Event::Apply(secret) => {
                if let Some(key) = SecretKey::from_secret(&secret) {
                    self.known.insert(key);
                }
                vec![SyncEvent::SecretUpserted(secret)]
            }
            Event::Delete(secret) => match SecretKey::from_secret(&secret) {
                Some(key) => {
                    self.known.remove(&key);
                    vec![SyncEvent::SecretRemoved(key)]
                }
                None => Vec::new(),
            },
        }
    }
}

/// Turns namespace watcher events into reconciler events
///
/// Every namespace in the first listing is reported as created. A namespace
/// can appear after a source's startup fan-out listed its targets but before
/// this listing completes; extending every source again closes that gap.
#[derive(Debug, Default)]
pub struct NamespaceFeed {
    known: BTreeSet<String>,
    relisting: Option<BTreeSet<String>>,
}

impl NamespaceFeed {
    pub fn translate(&mut self, event: Event<Namespace>) -> Vec<SyncEvent> {
        match event {
            Event::Init => {
                self.relisting = Some(BTreeSet::new());
                Vec::new()
            }
            Event::InitApply(namespace) => {
                if !is_terminating(&namespace) {
                    if let Some(name) = namespace.metadata.name {
                        self.relisting
                            .get_or_insert_with(BTreeSet::new)
                            .insert(name);
                    }
                }
                Vec::new()
            }
            Event::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let created = seen
                    .difference(&self.known)
                    .cloned()
                    .map(SyncEvent::NamespaceCreated);
                let removed = self
                    .known
                    .difference(&seen)
                    .cloned()
                    .map(SyncEvent::NamespaceRemoved);
                let events: Vec<SyncEvent> = created.chain(removed).collect();
                self.known = seen;
                events
            }
            Event::Apply(namespace) => {
                let terminating = is_terminating(&namespace);
                let Some(name) = namespace.metadata.name else {
                    return Vec::new();
                };
                if terminating {
                    if self.known.remove(&name) {
                        return vec![SyncEvent::NamespaceRemoved(name)];
                    }
                    Vec::new()
                } else if self.known.insert(name.clone()) {
                    vec![SyncEvent::NamespaceCreated(name)]
                } else {
                    Vec::new()
                }
            }
            Event::Delete(namespace) => match namespace.metadata.name {
                Some(name) => {
                    self.known.remove(&name);
                    vec![SyncEvent::NamespaceRemoved(name)]
                }
                None => Vec::new(),
            },
        }
    }
}

/// Run the controller watch loop
///
/// Returns once a shutdown signal arrived and every queued fan-out finished.
/// Watch errors are reported and the watch resumes; they never end the loop.
///
/// # Errors
///
/// Currently none; bootstrap failures surface from initialization instead.
pub async fn run_watch_loop(
    secrets: Api<Secret>,
    namespaces: Api<Namespace>,
    reconciler: Reconciler,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config().clone();
    let restart_delay = config.watch_restart_delay_duration();

    let secret_stream = watcher::watcher(
        secrets,
        watcher::Config::default().labels(&config.label_selector()),
    )
    .default_backoff();
    let namespace_stream =
        watcher::watcher(namespaces, watcher::Config::default()).default_backoff();
    let mut secret_stream = std::pin::pin!(secret_stream);
    let mut namespace_stream = std::pin::pin!(namespace_stream);
    let mut shutdown = std::pin::pin!(shutdown_signal());

    let mut secret_feed = SecretFeed::default();
    let mut namespace_feed = NamespaceFeed::default();
    let mut initial_listing_applied = false;

    info!(
        selector = config.label_selector().as_str(),
        all_namespaces = config.watch_all_namespaces,
        "Starting controller watch loop..."
    );

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(event) = secret_stream.next() => match event {
                Ok(event) => {
                    let listing_done = matches!(event, Event::InitDone);
                    for sync_event in secret_feed.translate(event) {
                        reconciler.handle(sync_event);
                    }
                    if listing_done && !initial_listing_applied {
                        initial_listing_applied = true;
                        on_initial_listing(&reconciler, &server_state).await;
                    }
                }
                Err(e) => {
                    handle_watch_stream_error("secrets", &format!("{e:?}"), restart_delay).await;
                }
            },
            Some(event) = namespace_stream.next() => match event {
                Ok(event) => {
                    for sync_event in namespace_feed.translate(event) {
                        reconciler.handle(sync_event);
                    }
                }
                Err(e) => {
                    handle_watch_stream_error("namespaces", &format!("{e:?}"), restart_delay).await;
                }
            },
            else => {
                warn!("Watch streams ended, shutting down");
                break;
            }
        }
    }

    server_state.set_ready(false);
    info!("Marked server as not ready, waiting for in-flight fan-outs to complete...");
    reconciler.idle().await;
    info!("Controller stopped gracefully");
    Ok(())
}

async fn on_initial_listing(reconciler: &Reconciler, server_state: &ServerState) {
    let sources = reconciler.tracked_sources().len();
    match reconciler.sweep_orphans().await {
        Ok(0) => debug!("No orphaned mirrors found"),
        Ok(orphans) => info!(orphans, "Withdrawing mirrors of deleted sources"),
        Err(e) => warn!(error = %e, "Failed to list mirrors, orphan sweep skipped"),
    }
    server_state.set_ready(true);
    info!(sources, "Initial secret listing applied, controller is ready");
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating graceful shutdown..."),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
