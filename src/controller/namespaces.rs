//! # Namespace Enumerator
//!
//! Produces the set of namespaces a source secret must be mirrored into.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cluster::{ClusterError, ClusterState};

/// Lists replication targets on demand
#[derive(Clone)]
pub struct NamespaceEnumerator {
    cluster: Arc<dyn ClusterState>,
}

impl std::fmt::Debug for NamespaceEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceEnumerator").finish_non_exhaustive()
    }
}

impl NamespaceEnumerator {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterState>) -> Self {
        Self { cluster }
    }

    /// Every active namespace except `exclude`
    ///
    /// # Errors
    ///
    /// Propagates the failure of the underlying namespace listing.
    pub async fn targets(&self, exclude: &str) -> Result<BTreeSet<String>, ClusterError> {
        let mut namespaces: BTreeSet<String> =
            self.cluster.list_namespaces().await?.into_iter().collect();
        namespaces.remove(exclude);
        Ok(namespaces)
    }
}
