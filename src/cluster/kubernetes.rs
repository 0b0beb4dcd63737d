//! # Kubernetes Cluster State
//!
//! [`ClusterState`] over the Kubernetes API using `kube`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use tracing::debug;

use super::{ClusterError, ClusterState};
use crate::constants::NAMESPACE_PHASE_TERMINATING;

/// Cluster state backed by a live Kubernetes client
#[derive(Clone)]
pub struct KubeClusterState {
    client: Client,
}

impl std::fmt::Debug for KubeClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterState").finish_non_exhaustive()
    }
}

impl KubeClusterState {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(classify_kube_error)?;

        Ok(list
            .items
            .into_iter()
            .filter(|ns| !is_terminating(ns))
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>, ClusterError> {
        let secrets: Api<Secret> = Api::all(self.client.clone());
        secrets
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(classify_kube_error)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, ClusterError> {
        self.secrets(namespace)
            .get_opt(name)
            .await
            .map_err(classify_kube_error)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ClusterError> {
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(classify_kube_error)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| debug!(namespace, name, "secret deleted"))
            .map_err(classify_kube_error)
    }
}

/// Whether a namespace is being deleted
#[must_use]
pub fn is_terminating(namespace: &Namespace) -> bool {
    namespace
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == NAMESPACE_PHASE_TERMINATING)
}

/// Map a `kube` error onto the controller's error taxonomy
pub(crate) fn classify_kube_error(error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(api_err) => match api_err.code {
            404 => ClusterError::NotFound,
            409 => ClusterError::Conflict,
            // Writes into a terminating namespace are rejected with 403 but
            // resolve themselves once the namespace is gone
            403 if api_err.message.contains("being terminated") => {
                ClusterError::Transient(api_err.message)
            }
            401 | 403 => ClusterError::PermissionDenied(api_err.message),
            _ => ClusterError::Transient(format!("{} ({})", api_err.message, api_err.code)),
        },
        other => ClusterError::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NamespaceStatus;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(
            classify_kube_error(api_error(404, "secrets \"x\" not found")),
            ClusterError::NotFound
        );
        assert_eq!(
            classify_kube_error(api_error(409, "already exists")),
            ClusterError::Conflict
        );
        assert!(matches!(
            classify_kube_error(api_error(403, "secrets is forbidden")),
            ClusterError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_kube_error(api_error(401, "Unauthorized")),
            ClusterError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_kube_error(api_error(503, "unavailable")),
            ClusterError::Transient(_)
        ));
    }

    #[test]
    fn test_terminating_namespace_rejection_is_transient() {
        let err = api_error(
            403,
            "unable to create new content in namespace team-b because it is being terminated",
        );
        assert!(matches!(
            classify_kube_error(err),
            ClusterError::Transient(_)
        ));
    }

    #[test]
    fn test_is_terminating() {
        let mut ns = Namespace::default();
        assert!(!is_terminating(&ns));
        ns.status = Some(NamespaceStatus {
            phase: Some("Active".to_string()),
            ..NamespaceStatus::default()
        });
        assert!(!is_terminating(&ns));
        ns.status = Some(NamespaceStatus {
            phase: Some("Terminating".to_string()),
            ..NamespaceStatus::default()
        });
        assert!(is_terminating(&ns));
    }
}
