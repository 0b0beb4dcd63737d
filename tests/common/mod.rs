//! Common test utilities for the reconciler integration tests
//!
//! [`FakeCluster`] is an in-memory `ClusterState` with per-namespace fault
//! injection, an operation log, and optional write latency with per-name
//! concurrency tracking.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use secret_sync_controller::cluster::{ClusterError, ClusterState};
use secret_sync_controller::config::ControllerConfig;
use secret_sync_controller::constants::SOURCE_NAMESPACE_ANNOTATION;
use secret_sync_controller::controller::reconciler::Reconciler;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cluster operation recorded by [`FakeCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Get { namespace: String, name: String },
    Create { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

impl Op {
    pub fn is_write(&self) -> bool {
        !matches!(self, Op::Get { .. })
    }

    pub fn namespace(&self) -> &str {
        match self {
            Op::Get { namespace, .. } | Op::Create { namespace, .. } | Op::Delete { namespace, .. } => {
                namespace
            }
        }
    }
}

#[derive(Default)]
struct State {
    /// name -> terminating
    namespaces: BTreeMap<String, bool>,
    secrets: BTreeMap<(String, String), Secret>,
    faults: HashMap<String, ClusterError>,
    listing_fault: Option<ClusterError>,
    planted: HashMap<String, Secret>,
    ops: Vec<Op>,
    next_version: u64,
    write_delay: Duration,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

impl State {
    fn stamp(&mut self, mut secret: Secret) -> Secret {
        self.next_version += 1;
        secret.metadata.resource_version = Some(self.next_version.to_string());
        secret
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn with_namespaces(namespaces: &[&str]) -> Arc<Self> {
        let cluster = Self::default();
        for namespace in namespaces {
            cluster.add_namespace(namespace);
        }
        Arc::new(cluster)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster state")
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.lock().namespaces.insert(namespace.to_string(), false);
    }

    pub fn set_terminating(&self, namespace: &str) {
        self.lock().namespaces.insert(namespace.to_string(), true);
    }

    /// Delete a namespace and everything in it
    pub fn remove_namespace(&self, namespace: &str) {
        let mut state = self.lock();
        state.namespaces.remove(namespace);
        state.secrets.retain(|(ns, _), _| ns != namespace);
    }

    /// Store a secret as a tenant would, returning it with its new version
    pub fn put_secret(&self, secret: Secret) -> Secret {
        let mut state = self.lock();
        let stored = state.stamp(secret);
        let key = (
            stored.metadata.namespace.clone().unwrap_or_default(),
            stored.metadata.name.clone().unwrap_or_default(),
        );
        state.secrets.insert(key, stored.clone());
        stored
    }

    /// Delete a secret out of band
    pub fn remove_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Data of a secret decoded as UTF-8
    pub fn data_of(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.secret(namespace, name).map(|s| decode(&s))
    }

    /// Namespaces holding a mirror named `name`
    pub fn mirrors_of(&self, name: &str) -> BTreeSet<String> {
        self.lock()
            .secrets
            .iter()
            .filter(|((_, n), secret)| n == name && is_mirror(secret))
            .map(|((ns, _), _)| ns.clone())
            .collect()
    }

    /// All mirrors in the cluster
    pub fn all_mirrors(&self) -> Vec<Secret> {
        self.lock()
            .secrets
            .values()
            .filter(|secret| is_mirror(secret))
            .cloned()
            .collect()
    }

    /// Make every operation against `namespace` fail
    pub fn fail_namespace(&self, namespace: &str, error: ClusterError) {
        self.lock().faults.insert(namespace.to_string(), error);
    }

    pub fn fail_listing(&self, error: ClusterError) {
        self.lock().listing_fault = Some(error);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.listing_fault = None;
    }

    /// Simulate a racing writer: the next create in `namespace` finds `secret`
    /// already there and fails with a conflict
    pub fn plant_on_next_create(&self, namespace: &str, secret: Secret) {
        self.lock().planted.insert(namespace.to_string(), secret);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// Highest number of concurrent writes seen for secrets named `name`
    pub fn max_concurrent_writes(&self, name: &str) -> usize {
        self.lock().max_in_flight.get(name).copied().unwrap_or(0)
    }

    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    pub fn writes(&self) -> Vec<Op> {
        self.ops().into_iter().filter(Op::is_write).collect()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    fn check(&self, namespace: &str) -> Result<(), ClusterError> {
        match self.lock().faults.get(namespace) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn track_write(&self, name: &str) {
        let delay = {
            let mut state = self.lock();
            let count = state.in_flight.entry(name.to_string()).or_insert(0);
            *count += 1;
            let current = *count;
            let max = state.max_in_flight.entry(name.to_string()).or_insert(0);
            *max = (*max).max(current);
            state.write_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if let Some(count) = state.in_flight.get_mut(name) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl ClusterState for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        let state = self.lock();
        if let Some(error) = &state.listing_fault {
            return Err(error.clone());
        }
        Ok(state
            .namespaces
            .iter()
            .filter(|(_, terminating)| !**terminating)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let state = self.lock();
        if let Some(error) = &state.listing_fault {
            return Err(error.clone());
        }
        let (key, value) = label_selector
            .split_once('=')
            .ok_or_else(|| ClusterError::Transient(format!("bad selector {label_selector}")))?;
        Ok(state
            .secrets
            .values()
            .filter(|secret| {
                secret
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.lock().ops.push(Op::Get {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self.check(namespace)?;
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.lock().ops.push(Op::Create {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
        self.check(namespace)?;
        self.track_write(&name).await;

        let mut state = self.lock();
        match state.namespaces.get(namespace) {
            None => return Err(ClusterError::NotFound),
            Some(true) => {
                return Err(ClusterError::Transient(format!(
                    "namespace {namespace} is being terminated"
                )))
            }
            Some(false) => {}
        }
        let key = (namespace.to_string(), name);
        if let Some(planted) = state.planted.remove(namespace) {
            let planted = state.stamp(planted);
            state.secrets.insert(key, planted);
            return Err(ClusterError::Conflict);
        }
        if state.secrets.contains_key(&key) {
            return Err(ClusterError::Conflict);
        }
        let mut stored = state.stamp(secret.clone());
        stored.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key, stored);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.lock().ops.push(Op::Delete {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self.check(namespace)?;
        self.track_write(name).await;

        self.lock()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or(ClusterError::NotFound)
    }
}

pub fn is_mirror(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(SOURCE_NAMESPACE_ANNOTATION))
}

pub fn decode(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
        .collect()
}

pub fn payload(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Secret with the given labels and data
pub fn secret(
    namespace: &str,
    name: &str,
    labels: &[(&str, &str)],
    data: &[(&str, &str)],
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(payload(labels)),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Secret::default()
    }
}

/// Secret carrying the default sentinel label
pub fn source(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    secret(namespace, name, &[("kss-operator/sync", "sync")], data)
}

/// A mirror as the controller would have written it
pub fn mirror(namespace: &str, name: &str, origin: &str, data: &[(&str, &str)]) -> Secret {
    let mut mirror = secret(namespace, name, &[("kss-operator/sync", "synced")], data);
    mirror.metadata.annotations = Some(BTreeMap::from([(
        SOURCE_NAMESPACE_ANNOTATION.to_string(),
        origin.to_string(),
    )]));
    mirror
}

/// Active namespace as delivered by the namespace watcher
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        status: Some(NamespaceStatus {
            phase: Some("Active".to_string()),
            ..NamespaceStatus::default()
        }),
        ..Namespace::default()
    }
}

pub fn reconciler(cluster: &Arc<FakeCluster>, config: ControllerConfig) -> Reconciler {
    let cluster: Arc<dyn ClusterState> = Arc::clone(cluster) as Arc<dyn ClusterState>;
    Reconciler::new(cluster, Arc::new(config))
}
