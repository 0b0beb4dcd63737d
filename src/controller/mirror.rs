//! # Mirror Repository
//!
//! Idempotent create/replace/delete of mirror secrets in a target namespace.
//!
//! A mirror write is a delete followed by a create rather than an in-place
//! update, so the mirror's data, type and metadata end up exactly as built
//! from the source. Readers may briefly observe the mirror missing.
//!
//! Objects that are not mirrors (no source-namespace annotation) are never
//! touched: a tenant's own secret that happens to share the source's name is
//! reported as [`MirrorOutcome::SkippedForeign`].

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::filter::{is_mirror, mirror_origin};
use super::reconciler::types::{MirrorOutcome, SecretPayload, SourceSecret};
use crate::cluster::{ClusterError, ClusterState};
use crate::config::ControllerConfig;
use crate::constants::{SOURCE_NAMESPACE_ANNOTATION, SYNCED_AT_ANNOTATION};

/// Everything needed to materialise one source secret as a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSpec {
    pub name: String,
    pub source_namespace: String,
    pub payload: SecretPayload,
    pub labels: BTreeMap<String, String>,
}

impl MirrorSpec {
    /// Mirror of `source`, labelled with the mirror value so it is never a source itself
    #[must_use]
    pub fn for_source(source: &SourceSecret, config: &ControllerConfig) -> Self {
        let labels = BTreeMap::from([(
            config.sync_label_key.clone(),
            config.mirror_label_value.clone(),
        )]);
        Self {
            name: source.key.name.clone(),
            source_namespace: source.key.namespace.clone(),
            payload: source.payload.clone(),
            labels,
        }
    }

    /// The secret object to create in `namespace`
    #[must_use]
    pub fn to_secret(&self, namespace: &str) -> Secret {
        let annotations = BTreeMap::from([
            (
                SOURCE_NAMESPACE_ANNOTATION.to_string(),
                self.source_namespace.clone(),
            ),
            (
                SYNCED_AT_ANNOTATION.to_string(),
                chrono::Utc::now().timestamp().to_string(),
            ),
        ]);
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels.clone()),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            data: Some(self.payload.data.clone()),
            type_: self.payload.secret_type.clone(),
            ..Secret::default()
        }
    }
}

/// Namespace-scoped secret writes on behalf of the reconciler
#[derive(Clone)]
pub struct MirrorRepository {
    cluster: Arc<dyn ClusterState>,
    skip_unchanged: bool,
}

impl std::fmt::Debug for MirrorRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorRepository")
            .field("skip_unchanged", &self.skip_unchanged)
            .finish_non_exhaustive()
    }
}

impl MirrorRepository {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterState>, skip_unchanged: bool) -> Self {
        Self {
            cluster,
            skip_unchanged,
        }
    }

    /// Make `namespace` hold an up-to-date mirror
    ///
    /// Succeeds whether or not a previous mirror existed.
    ///
    /// # Errors
    ///
    /// Any cluster failure other than a benign `NotFound` on delete, or a
    /// `Conflict` that persists after one delete-and-retry.
    pub async fn ensure(
        &self,
        namespace: &str,
        mirror: &MirrorSpec,
    ) -> Result<MirrorOutcome, ClusterError> {
        let existing = self.cluster.get_secret(namespace, &mirror.name).await?;

        let outcome = match existing {
            Some(existing) if !is_mirror(&existing) => {
                return Ok(skip_foreign(namespace, mirror));
            }
            Some(existing) if self.skip_unchanged && mirror.payload.matches(&existing) => {
                return Ok(MirrorOutcome::Unchanged);
            }
            Some(_) => {
                self.delete_ignoring_absent(namespace, &mirror.name).await?;
                MirrorOutcome::Replaced
            }
            None => MirrorOutcome::Created,
        };

        match self
            .cluster
            .create_secret(namespace, &mirror.to_secret(namespace))
            .await
        {
            Ok(()) => Ok(outcome),
            Err(ClusterError::Conflict) => self.recover_conflict(namespace, mirror).await,
            Err(e) => Err(e),
        }
    }

    /// Delete the mirror of a `source_namespace` secret named `name`
    ///
    /// Succeeds whether or not the mirror exists.
    ///
    /// # Errors
    ///
    /// Any cluster failure other than `NotFound`.
    pub async fn remove(
        &self,
        namespace: &str,
        name: &str,
        source_namespace: &str,
    ) -> Result<MirrorOutcome, ClusterError> {
        let Some(existing) = self.cluster.get_secret(namespace, name).await? else {
            return Ok(MirrorOutcome::Absent);
        };

        if mirror_origin(&existing) != Some(source_namespace) {
            debug!(
                target_namespace = namespace,
                secret.name = name,
                origin = mirror_origin(&existing).unwrap_or("none"),
                "Leaving secret in place - not a mirror of this source"
            );
            return Ok(MirrorOutcome::SkippedForeign);
        }

        match self.cluster.delete_secret(namespace, name).await {
            Ok(()) => Ok(MirrorOutcome::Deleted),
            Err(ClusterError::NotFound) => Ok(MirrorOutcome::Absent),
            Err(e) => Err(e),
        }
    }

    /// A stale object appeared between our read and create: delete it and
    /// retry the create once.
    async fn recover_conflict(
        &self,
        namespace: &str,
        mirror: &MirrorSpec,
    ) -> Result<MirrorOutcome, ClusterError> {
        debug!(
            target_namespace = namespace,
            secret.name = mirror.name.as_str(),
            "Create conflicted with an existing object, replacing it"
        );
        if let Some(existing) = self.cluster.get_secret(namespace, &mirror.name).await? {
            if !is_mirror(&existing) {
                return Ok(skip_foreign(namespace, mirror));
            }
        }
        self.delete_ignoring_absent(namespace, &mirror.name).await?;
        self.cluster
            .create_secret(namespace, &mirror.to_secret(namespace))
            .await?;
        Ok(MirrorOutcome::Replaced)
    }

    async fn delete_ignoring_absent(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        match self.cluster.delete_secret(namespace, name).await {
            Ok(()) | Err(ClusterError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn skip_foreign(namespace: &str, mirror: &MirrorSpec) -> MirrorOutcome {
    warn!(
        target_namespace = namespace,
        secret.name = mirror.name.as_str(),
        source.namespace = mirror.source_namespace.as_str(),
        "Secret exists but is not a mirror, skipping to avoid overwriting it"
    );
    MirrorOutcome::SkippedForeign
}
