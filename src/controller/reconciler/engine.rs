//! # Engine
//!
//! Per-identity state machine and fan-out execution.
//!
//! [`Reconciler::handle`] applies an event to the registry of PRESENT sources
//! synchronously and queues the resulting work on the identity's lane. Lane
//! workers perform the cluster writes. Fan-out is best effort per target: a
//! failed namespace is logged, counted, and recorded in the [`FanOutReport`]
//! while the remaining namespaces are still written.

use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::lanes::{Job, Lanes};
use super::types::{
    FanOutReport, MirrorOperation, MirrorOutcome, SecretKey, SourceSecret, SyncEvent,
    TargetResult, TrackedSource,
};
use crate::cluster::{ClusterError, ClusterState};
use crate::config::ControllerConfig;
use crate::controller::filter::{mirror_origin, LabelFilter};
use crate::controller::mirror::{MirrorRepository, MirrorSpec};
use crate::controller::namespaces::NamespaceEnumerator;
use crate::observability::metrics;

/// Reconciler context, cheap to clone
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ControllerConfig>,
    cluster: Arc<dyn ClusterState>,
    filter: LabelFilter,
    namespaces: NamespaceEnumerator,
    mirrors: MirrorRepository,
    registry: Mutex<HashMap<SecretKey, SourceSecret>>,
    lanes: Lanes,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.inner.config)
            .field("lanes", &self.inner.lanes)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterState>, config: Arc<ControllerConfig>) -> Self {
        let inner = Inner {
            filter: LabelFilter::from_config(&config),
            namespaces: NamespaceEnumerator::new(Arc::clone(&cluster)),
            mirrors: MirrorRepository::new(Arc::clone(&cluster), config.skip_unchanged_mirrors),
            lanes: Lanes::new(config.max_concurrent_reconciliations),
            registry: Mutex::new(HashMap::new()),
            cluster,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Apply one event and queue the resulting work
    ///
    /// Must be called from within a Tokio runtime: newly opened lanes spawn a
    /// worker task.
    pub fn handle(&self, event: SyncEvent) {
        let span = info_span!("sync.event", kind = event.kind());
        let _guard = span.enter();

        let kind = match event {
            SyncEvent::SecretUpserted(secret) => self.on_secret_upserted(&secret),
            SyncEvent::SecretRemoved(key) => self.on_secret_removed(key),
            SyncEvent::NamespaceCreated(namespace) => self.on_namespace_created(&namespace),
            SyncEvent::NamespaceRemoved(namespace) => {
                // Mirrors go with the namespace
                debug!(namespace = namespace.as_str(), "Namespace removed");
                "namespace_removed"
            }
        };
        metrics::increment_events(kind);
    }

    fn on_secret_upserted(&self, secret: &Secret) -> &'static str {
        let Some(key) = SecretKey::from_secret(secret) else {
            warn!("Ignoring secret without name or namespace");
            return "ignored";
        };

        if !self.inner.filter.is_in_scope(secret) {
            // Sentinel label removed, or a mirror carrying it: never a source
            return self.on_secret_removed(key);
        }
        let Some(source) = SourceSecret::from_secret(secret) else {
            return "ignored";
        };

        {
            let mut registry = self.registry();
            let previous = registry.insert(key.clone(), source.clone());
            debug!(
                source.namespace = key.namespace.as_str(),
                source.name = key.name.as_str(),
                version = source.version.as_deref().unwrap_or("unknown"),
                previous_version = previous
                    .as_ref()
                    .and_then(|p| p.version.as_deref())
                    .unwrap_or("none"),
                "Source secret observed"
            );
            metrics::set_sources_tracked(registry.len());
        }

        self.enqueue(key, Job::Replicate(source));
        "secret_upserted"
    }

    fn on_secret_removed(&self, key: SecretKey) -> &'static str {
        let was_present = {
            let mut registry = self.registry();
            let removed = registry.remove(&key).is_some();
            metrics::set_sources_tracked(registry.len());
            removed
        };
        if !was_present {
            return "ignored";
        }

        info!(
            source.namespace = key.namespace.as_str(),
            source.name = key.name.as_str(),
            "Source secret removed, withdrawing mirrors"
        );
        self.enqueue(key.clone(), Job::Withdraw(key));
        "secret_removed"
    }

    fn on_namespace_created(&self, namespace: &str) -> &'static str {
        let keys: Vec<SecretKey> = self
            .registry()
            .keys()
            .filter(|key| key.namespace != namespace)
            .cloned()
            .collect();

        info!(
            namespace,
            sources = keys.len(),
            "Namespace created, extending mirrors"
        );
        for key in keys {
            self.enqueue(
                key.clone(),
                Job::Extend {
                    key,
                    namespace: namespace.to_string(),
                },
            );
        }
        "namespace_created"
    }

    fn enqueue(&self, key: SecretKey, job: Job) {
        if self.inner.lanes.push(key.clone(), job) {
            let reconciler = self.clone();
            tokio::spawn(async move { reconciler.drain_lane(key).await });
        }
    }

    async fn drain_lane(&self, key: SecretKey) {
        while let Some(job) = self.inner.lanes.pop(&key) {
            {
                let _permit = self.inner.lanes.permit().await;
                self.run(job).await;
            }
            self.inner.lanes.finish();
        }
    }

    async fn run(&self, job: Job) {
        match job {
            Job::Replicate(source) => {
                self.replicate(&source).await;
            }
            Job::Withdraw(key) => {
                self.withdraw(&key).await;
            }
            Job::Extend { key, namespace } => {
                let current = self.registry().get(&key).cloned();
                match current {
                    Some(source) => {
                        // Already logged and counted per target
                        let _ = self.extend_source(&source, &namespace).await;
                    }
                    None => debug!(
                        source.namespace = key.namespace.as_str(),
                        source.name = key.name.as_str(),
                        target_namespace = namespace.as_str(),
                        "Source no longer present, skipping extend"
                    ),
                }
            }
        }
    }

    /// Write `source` into every target namespace
    pub async fn replicate(&self, source: &SourceSecret) -> FanOutReport {
        let key = &source.key;
        let span = info_span!(
            "sync.fanout",
            source.namespace = key.namespace.as_str(),
            source.name = key.name.as_str(),
            operation = MirrorOperation::Ensure.as_str()
        );
        let mirror = MirrorSpec::for_source(source, &self.inner.config);
        self.fan_out(key, MirrorOperation::Ensure, |namespace| {
            let mirror = &mirror;
            async move { self.inner.mirrors.ensure(&namespace, mirror).await }
        })
        .instrument(span)
        .await
    }

    /// Delete the mirrors of `key` from every target namespace
    pub async fn withdraw(&self, key: &SecretKey) -> FanOutReport {
        let span = info_span!(
            "sync.fanout",
            source.namespace = key.namespace.as_str(),
            source.name = key.name.as_str(),
            operation = MirrorOperation::Remove.as_str()
        );
        self.fan_out(key, MirrorOperation::Remove, |namespace| async move {
            self.inner
                .mirrors
                .remove(&namespace, &key.name, &key.namespace)
                .await
        })
        .instrument(span)
        .await
    }

    /// Write every PRESENT source into a newly created namespace
    ///
    /// Runs outside the lanes; the event path queues one job per identity instead.
    pub async fn extend(
        &self,
        namespace: &str,
    ) -> Vec<(SecretKey, Result<MirrorOutcome, ClusterError>)> {
        let mut sources: Vec<SourceSecret> = self
            .registry()
            .values()
            .filter(|source| source.key.namespace != namespace)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.key.cmp(&b.key));

        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let outcome = self.extend_source(&source, namespace).await;
            results.push((source.key, outcome));
        }
        results
    }

    async fn extend_source(
        &self,
        source: &SourceSecret,
        namespace: &str,
    ) -> Result<MirrorOutcome, ClusterError> {
        let span = info_span!(
            "sync.fanout",
            source.namespace = source.key.namespace.as_str(),
            source.name = source.key.name.as_str(),
            operation = "extend"
        );
        let mirror = MirrorSpec::for_source(source, &self.inner.config);
        let outcome = self
            .inner
            .mirrors
            .ensure(namespace, &mirror)
            .instrument(span)
            .await;
        record_target(&source.key, namespace, MirrorOperation::Ensure, &outcome);
        outcome
    }

    async fn fan_out<F, Fut>(
        &self,
        key: &SecretKey,
        operation: MirrorOperation,
        write: F,
    ) -> FanOutReport
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<MirrorOutcome, ClusterError>>,
    {
        let started = Instant::now();
        let mut report = FanOutReport::new(key.clone(), operation);

        match self.inner.namespaces.targets(&key.namespace).await {
            Ok(targets) => {
                for namespace in targets {
                    let outcome = write(namespace.clone()).await;
                    record_target(key, &namespace, operation, &outcome);
                    report.targets.push(TargetResult { namespace, outcome });
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    reason = e.reason(),
                    "Failed to list target namespaces, fan-out skipped"
                );
                metrics::increment_mirror_errors(operation.as_str(), e.reason());
                report.enumeration_error = Some(e);
            }
        }

        metrics::observe_fanout_duration(operation.as_str(), started.elapsed().as_secs_f64());
        let failed = report.failures().count();
        if report.is_complete() {
            info!(targets = report.targets.len(), "Fan-out complete");
        } else {
            warn!(
                targets = report.targets.len(),
                failed, "Fan-out finished with failures"
            );
        }
        report
    }

    /// Withdraw mirrors whose source is no longer PRESENT
    ///
    /// Run once the initial secret listing has been applied, so sources deleted
    /// while the controller was down do not leave mirrors behind. Returns the
    /// number of orphaned sources queued for withdrawal.
    ///
    /// # Errors
    ///
    /// Fails when the mirrors cannot be listed.
    pub async fn sweep_orphans(&self) -> Result<usize, ClusterError> {
        let config = &self.inner.config;
        let selector = format!("{}={}", config.sync_label_key, config.mirror_label_value);
        let mirrors = self.inner.cluster.list_secrets(&selector).await?;

        let orphans: BTreeSet<SecretKey> = {
            let registry = self.registry();
            mirrors
                .iter()
                .filter_map(|mirror| {
                    let origin = mirror_origin(mirror)?;
                    let name = mirror.metadata.name.as_deref()?;
                    Some(SecretKey::new(origin, name))
                })
                .filter(|key| {
                    config.watch_all_namespaces || key.namespace == config.controller_namespace
                })
                .filter(|key| !registry.contains_key(key))
                .collect()
        };

        for key in &orphans {
            info!(
                source.namespace = key.namespace.as_str(),
                source.name = key.name.as_str(),
                "Source no longer exists, withdrawing orphaned mirrors"
            );
            self.enqueue(key.clone(), Job::Withdraw(key.clone()));
        }
        Ok(orphans.len())
    }

    /// Sources currently PRESENT, ordered by identity
    #[must_use]
    pub fn tracked_sources(&self) -> Vec<TrackedSource> {
        let mut sources: Vec<TrackedSource> = self
            .registry()
            .values()
            .map(|source| TrackedSource {
                namespace: source.key.namespace.clone(),
                name: source.key.name.clone(),
                version: source.version.clone(),
            })
            .collect();
        sources.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        sources
    }

    /// Resolves once every queued job has finished
    pub async fn idle(&self) {
        self.inner.lanes.idle().await;
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SecretKey, SourceSecret>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_target(
    key: &SecretKey,
    namespace: &str,
    operation: MirrorOperation,
    outcome: &Result<MirrorOutcome, ClusterError>,
) {
    match outcome {
        Ok(result) => {
            debug!(
                source.namespace = key.namespace.as_str(),
                source.name = key.name.as_str(),
                target_namespace = namespace,
                outcome = result.as_str(),
                "Mirror {}", operation.as_str()
            );
            metrics::increment_mirror_operations(operation.as_str(), result.as_str());
        }
        Err(e @ ClusterError::PermissionDenied(_)) => {
            error!(
                source.namespace = key.namespace.as_str(),
                source.name = key.name.as_str(),
                target_namespace = namespace,
                error = %e,
                "Mirror {} denied - check the controller's ClusterRole grants get/create/delete on secrets",
                operation.as_str()
            );
            metrics::increment_mirror_errors(operation.as_str(), e.reason());
        }
        Err(e) => {
            warn!(
                source.namespace = key.namespace.as_str(),
                source.name = key.name.as_str(),
                target_namespace = namespace,
                error = %e,
                "Mirror {} failed, will converge on the next event or resync",
                operation.as_str()
            );
            metrics::increment_mirror_errors(operation.as_str(), e.reason());
        }
    }
}
