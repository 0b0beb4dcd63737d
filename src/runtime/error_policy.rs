//! # Error Policy
//!
//! Classification and handling of watch stream errors.
//!
//! Watch streams are wrapped in kube's default backoff, so the stream itself
//! retries. This module decides how loudly to report each error and whether to
//! wait before the stream is polled again.

use std::time::Duration;
use tracing::{error, warn};

use crate::observability::metrics;

/// Broad cause of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401/403: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version expired, the watcher re-lists
    Expired,
    /// 429: API server throttling or storage reinitializing
    Throttled,
    /// 404: resource type not served
    NotFound,
    Other,
}

impl WatchErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchErrorKind::Unauthorized => "unauthorized",
            WatchErrorKind::Expired => "expired",
            WatchErrorKind::Throttled => "throttled",
            WatchErrorKind::NotFound => "not_found",
            WatchErrorKind::Other => "other",
        }
    }
}

/// Classify a watch error from its debug rendering
///
/// 404 is checked before 401: a plain-text 404 body surfaces as a decode
/// error whose chain also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_unauthorized = (error_string.contains("401")
        || error_string.contains("Unauthorized")
        || error_string.contains("403")
        || error_string.contains("Forbidden"))
        && !is_not_found;
    let is_expired = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_throttled = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_unauthorized {
        WatchErrorKind::Unauthorized
    } else if is_expired {
        WatchErrorKind::Expired
    } else if is_throttled {
        WatchErrorKind::Throttled
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Report a watch stream error and wait if the cause needs time to clear
///
/// The caller keeps polling the stream afterwards; a watch error never stops
/// the controller.
pub async fn handle_watch_stream_error(
    resource: &str,
    error_string: &str,
    restart_delay: Duration,
) -> WatchErrorKind {
    let kind = classify_watch_error(error_string);
    metrics::increment_watch_errors(resource);

    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                resource,
                error = error_string,
                "❌ Watch authorization failed - RBAC may have been revoked or token expired"
            );
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the ClusterRole grants list/watch on {resource}:");
            error!("      kubectl get clusterrole secret-sync-controller -o yaml");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding secret-sync-controller -o yaml");
            error!("   3. Check the effective permissions:");
            error!(
                "      kubectl auth can-i watch {resource} --as=system:serviceaccount:kss-operator:secret-sync-controller --all-namespaces"
            );
            warn!(
                "⏳ Waiting {}s before resuming the {} watch...",
                restart_delay.as_secs(),
                resource
            );
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorKind::Expired => {
            warn!(
                resource,
                "Watch resource version expired (410), the watcher will re-list"
            );
        }
        WatchErrorKind::Throttled => {
            warn!(
                resource,
                "API server throttling or reinitializing storage (429), backing off"
            );
        }
        WatchErrorKind::NotFound => {
            warn!(
                resource,
                error = error_string,
                "Watched resource not found (404)"
            );
        }
        WatchErrorKind::Other => {
            error!(resource, error = error_string, "Watch stream error");
        }
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unauthorized() {
        assert_eq!(
            classify_watch_error("WatchFailed(Api(ErrorResponse { code: 401, reason: \"Unauthorized\" }))"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("InitialListFailed(Api(ErrorResponse { code: 403, reason: \"Forbidden\" }))"),
            WatchErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_classify_expired() {
        assert_eq!(
            classify_watch_error("WatchError(ErrorResponse { message: \"too old resource version: 1 (2)\", code: 410 })"),
            WatchErrorKind::Expired
        );
    }

    #[test]
    fn test_classify_throttled() {
        assert_eq!(
            classify_watch_error("InitialListFailed(Api(ErrorResponse { message: \"storage is (re)initializing\", code: 429 }))"),
            WatchErrorKind::Throttled
        );
    }

    #[test]
    fn test_not_found_wins_over_watch_failed() {
        assert_eq!(
            classify_watch_error("WatchFailed(SerdeError(invalid type: integer `404`))"),
            WatchErrorKind::NotFound
        );
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            classify_watch_error("WatchFailed(HyperError(connection reset by peer))"),
            WatchErrorKind::Other
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_waits_before_resuming() {
        let started = tokio::time::Instant::now();
        let kind = handle_watch_stream_error(
            "secrets",
            "WatchFailed(Api(ErrorResponse { code: 401 }))",
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(kind, WatchErrorKind::Unauthorized);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
