//! # Types
//!
//! Core types for the reconciler.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::ClusterError;

/// Default secret type assigned by the API server when none is given
const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// Identity of a secret: namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a secret object, `None` if it lacks a name or namespace
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        Some(Self::new(
            secret.metadata.namespace.as_deref()?,
            secret.metadata.name.as_deref()?,
        ))
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The replicated content of a secret: its data map and its type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecretPayload {
    pub data: BTreeMap<String, ByteString>,
    pub secret_type: Option<String>,
}

impl SecretPayload {
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Self {
        Self {
            data: secret.data.clone().unwrap_or_default(),
            secret_type: secret.type_.clone(),
        }
    }

    /// Whether an existing secret already carries exactly this payload
    #[must_use]
    pub fn matches(&self, secret: &Secret) -> bool {
        let existing_data = secret.data.as_ref().filter(|d| !d.is_empty());
        let data_matches = match existing_data {
            Some(data) => *data == self.data,
            None => self.data.is_empty(),
        };
        data_matches && normalized_type(secret.type_.as_deref()) == self.normalized_type()
    }

    fn normalized_type(&self) -> &str {
        normalized_type(self.secret_type.as_deref())
    }
}

fn normalized_type(secret_type: Option<&str>) -> &str {
    secret_type.unwrap_or(DEFAULT_SECRET_TYPE)
}

/// A secret bearing the sync sentinel label, as last observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSecret {
    pub key: SecretKey,
    /// `resourceVersion` supplied by the API server
    pub version: Option<String>,
    pub payload: SecretPayload,
    pub labels: BTreeMap<String, String>,
}

impl SourceSecret {
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        Some(Self {
            key: SecretKey::from_secret(secret)?,
            version: secret.metadata.resource_version.clone(),
            payload: SecretPayload::from_secret(secret),
            labels: secret.metadata.labels.clone().unwrap_or_default(),
        })
    }
}

/// Change notification consumed by the reconciler
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A secret was created, updated, or listed during a resync
    SecretUpserted(Secret),
    /// A secret was deleted or stopped matching the watch selector
    SecretRemoved(SecretKey),
    /// A namespace appeared
    NamespaceCreated(String),
    /// A namespace disappeared
    NamespaceRemoved(String),
}

impl SyncEvent {
    /// Stable label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::SecretUpserted(_) => "secret_upserted",
            SyncEvent::SecretRemoved(_) => "secret_removed",
            SyncEvent::NamespaceCreated(_) => "namespace_created",
            SyncEvent::NamespaceRemoved(_) => "namespace_removed",
        }
    }
}

/// Per-target operation performed by a fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOperation {
    Ensure,
    Remove,
}

impl MirrorOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorOperation::Ensure => "ensure",
            MirrorOperation::Remove => "remove",
        }
    }
}

/// Successful result of a single mirror write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// No mirror existed; one was created
    Created,
    /// A stale mirror was deleted and recreated
    Replaced,
    /// The mirror already matched and `skip_unchanged_mirrors` is enabled
    Unchanged,
    /// The mirror was deleted
    Deleted,
    /// Nothing to delete
    Absent,
    /// The target name is held by a secret this controller does not own
    SkippedForeign,
}

impl MirrorOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorOutcome::Created => "created",
            MirrorOutcome::Replaced => "replaced",
            MirrorOutcome::Unchanged => "unchanged",
            MirrorOutcome::Deleted => "deleted",
            MirrorOutcome::Absent => "absent",
            MirrorOutcome::SkippedForeign => "skipped_foreign",
        }
    }
}

/// Result of one fan-out against one target namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub namespace: String,
    pub outcome: Result<MirrorOutcome, ClusterError>,
}

/// Summary of a fan-out across all target namespaces of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub key: SecretKey,
    pub operation: MirrorOperation,
    pub targets: Vec<TargetResult>,
    /// Set when the target namespaces could not be listed at all
    pub enumeration_error: Option<ClusterError>,
}

impl FanOutReport {
    #[must_use]
    pub fn new(key: SecretKey, operation: MirrorOperation) -> Self {
        Self {
            key,
            operation,
            targets: Vec::new(),
            enumeration_error: None,
        }
    }

    /// Outcome recorded for a namespace, if it was a target
    #[must_use]
    pub fn outcome_for(&self, namespace: &str) -> Option<&Result<MirrorOutcome, ClusterError>> {
        self.targets
            .iter()
            .find(|t| t.namespace == namespace)
            .map(|t| &t.outcome)
    }

    /// Targets whose write failed
    pub fn failures(&self) -> impl Iterator<Item = &TargetResult> {
        self.targets.iter().filter(|t| t.outcome.is_err())
    }

    /// True when the namespace listing and every target write succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.enumeration_error.is_none() && self.failures().next().is_none()
    }
}

/// Source secret as reported on the `/sources` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedSource {
    pub namespace: String,
    pub name: String,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn secret(data: &[(&str, &str)], secret_type: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("db-creds".to_string()),
                namespace: Some("team-a".to_string()),
                resource_version: Some("42".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            type_: secret_type.map(str::to_string),
            ..Secret::default()
        }
    }

    #[test]
    fn test_secret_key_requires_name_and_namespace() {
        let mut s = secret(&[], None);
        assert_eq!(
            SecretKey::from_secret(&s),
            Some(SecretKey::new("team-a", "db-creds"))
        );
        s.metadata.namespace = None;
        assert_eq!(SecretKey::from_secret(&s), None);
    }

    #[test]
    fn test_secret_key_display() {
        assert_eq!(SecretKey::new("team-a", "db-creds").to_string(), "team-a/db-creds");
    }

    #[test]
    fn test_source_secret_captures_version_and_payload() {
        let source = SourceSecret::from_secret(&secret(&[("pwd", "x")], Some("Opaque")))
            .expect("named secret");
        assert_eq!(source.version.as_deref(), Some("42"));
        assert_eq!(source.payload.data["pwd"].0, b"x".to_vec());
        assert_eq!(source.payload.secret_type.as_deref(), Some("Opaque"));
    }

    #[test]
    fn test_payload_matches_treats_missing_type_as_opaque() {
        let payload = SecretPayload::from_secret(&secret(&[("pwd", "x")], None));
        assert!(payload.matches(&secret(&[("pwd", "x")], Some("Opaque"))));
        assert!(!payload.matches(&secret(&[("pwd", "y")], Some("Opaque"))));
        assert!(!payload.matches(&secret(
            &[("pwd", "x")],
            Some("kubernetes.io/basic-auth")
        )));
    }

    #[test]
    fn test_payload_matches_empty_data() {
        let payload = SecretPayload::default();
        let mut existing = secret(&[], None);
        assert!(payload.matches(&existing));
        existing.data = None;
        assert!(payload.matches(&existing));
    }

    #[test]
    fn test_report_completeness() {
        let mut report = FanOutReport::new(SecretKey::new("a", "s"), MirrorOperation::Ensure);
        report.targets.push(TargetResult {
            namespace: "b".into(),
            outcome: Ok(MirrorOutcome::Created),
        });
        assert!(report.is_complete());
        report.targets.push(TargetResult {
            namespace: "c".into(),
            outcome: Err(ClusterError::Transient("boom".into())),
        });
        assert!(!report.is_complete());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.outcome_for("b"), Some(&Ok(MirrorOutcome::Created)));
        assert_eq!(report.outcome_for("z"), None);
    }
}
