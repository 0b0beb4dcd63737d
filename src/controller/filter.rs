//! # Label Filter
//!
//! Decides which secrets are replication sources and which are mirrors.

use k8s_openapi::api::core::v1::Secret;

use crate::config::ControllerConfig;
use crate::constants::SOURCE_NAMESPACE_ANNOTATION;

/// Sentinel label predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    key: String,
    value: String,
}

impl LabelFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(&config.sync_label_key, &config.sync_label_value)
    }

    /// True iff the secret carries the sync key with exactly the sentinel value
    /// and is not a mirror
    ///
    /// A mirror relabelled by hand with the sentinel value stays out of scope.
    #[must_use]
    pub fn is_in_scope(&self, secret: &Secret) -> bool {
        let labelled = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.key))
            .is_some_and(|v| *v == self.value);
        labelled && !is_mirror(secret)
    }
}

/// Source namespace recorded on a mirror, `None` for secrets we did not write
#[must_use]
pub fn mirror_origin(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .annotations
        .as_ref()?
        .get(SOURCE_NAMESPACE_ANNOTATION)
        .map(String::as_str)
}

/// Whether a secret was written by this controller
#[must_use]
pub fn is_mirror(secret: &Secret) -> bool {
    mirror_origin(secret).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret_with(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Secret {
        let to_map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        Secret {
            metadata: ObjectMeta {
                name: Some("db-creds".into()),
                namespace: Some("team-a".into()),
                labels: Some(to_map(labels)),
                annotations: Some(to_map(annotations)),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    fn filter() -> LabelFilter {
        LabelFilter::from_config(&ControllerConfig::default())
    }

    #[test]
    fn test_sentinel_label_is_in_scope() {
        assert!(filter().is_in_scope(&secret_with(&[("kss-operator/sync", "sync")], &[])));
    }

    #[test]
    fn test_wrong_value_is_out_of_scope() {
        assert!(!filter().is_in_scope(&secret_with(&[("kss-operator/sync", "true")], &[])));
        assert!(!filter().is_in_scope(&secret_with(&[("kss-operator/sync", "")], &[])));
    }

    #[test]
    fn test_missing_label_is_out_of_scope() {
        assert!(!filter().is_in_scope(&secret_with(&[("app", "db")], &[])));
        assert!(!filter().is_in_scope(&Secret::default()));
    }

    #[test]
    fn test_mirror_label_is_out_of_scope() {
        let mirror = secret_with(
            &[("kss-operator/sync", "synced")],
            &[(SOURCE_NAMESPACE_ANNOTATION, "team-a")],
        );
        assert!(!filter().is_in_scope(&mirror));
        assert!(is_mirror(&mirror));
        assert_eq!(mirror_origin(&mirror), Some("team-a"));
    }

    #[test]
    fn test_relabelled_mirror_is_out_of_scope() {
        let relabelled = secret_with(
            &[("kss-operator/sync", "sync")],
            &[(SOURCE_NAMESPACE_ANNOTATION, "team-a")],
        );
        assert!(!filter().is_in_scope(&relabelled));
    }

    #[test]
    fn test_custom_sentinel() {
        let filter = LabelFilter::new("example.com/replicate", "yes");
        assert!(filter.is_in_scope(&secret_with(&[("example.com/replicate", "yes")], &[])));
        assert!(!filter.is_in_scope(&secret_with(&[("kss-operator/sync", "sync")], &[])));
    }

    #[test]
    fn test_plain_secret_is_not_a_mirror() {
        assert!(!is_mirror(&secret_with(&[], &[("owner", "team-b")])));
        assert_eq!(mirror_origin(&Secret::default()), None);
    }
}
