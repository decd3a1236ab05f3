//! Cluster capability watcher.
//!
//! Polls the discovery endpoint for the set of served API groups and
//! reports when the set, or the `OpenShift` flag derived from it, changes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kube::Client;
use tracing::debug;

use super::polling::{PollingWatcher, SnapshotSource};
use crate::config::WatchConfig;
use crate::Result;

/// API group whose presence marks an `OpenShift`-like cluster.
pub const OPENSHIFT_API_GROUP: &str = "project.openshift.io";

/// Sorted API group names plus the derived `OpenShift` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    /// Served API group names, sorted.
    pub api_groups: Vec<String>,
    /// Whether [`OPENSHIFT_API_GROUP`] is served.
    pub is_openshift: bool,
}

impl ClusterState {
    /// Build a state from unsorted group names.
    #[must_use]
    pub fn from_groups(groups: impl IntoIterator<Item = String>) -> Self {
        let mut api_groups: Vec<String> = groups.into_iter().collect();
        api_groups.sort();
        let is_openshift = api_groups.iter().any(|g| g == OPENSHIFT_API_GROUP);
        Self {
            api_groups,
            is_openshift,
        }
    }
}

/// Lists the API groups a cluster serves.
pub trait GroupLister: Send + Sync {
    /// Names of the served API groups, in any order.
    fn list_groups(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;
}

impl GroupLister for Client {
    fn list_groups(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let list = self.list_api_groups().await?;
            Ok(list.groups.into_iter().map(|g| g.name).collect())
        })
    }
}

/// Builds the group lister observed for a workspace client.
pub type GroupListerFactory = Arc<dyn Fn(&Client) -> Arc<dyn GroupLister> + Send + Sync>;

/// [`GroupListerFactory`] that queries the client itself.
#[must_use]
pub fn client_group_lister_factory() -> GroupListerFactory {
    Arc::new(|client: &Client| -> Arc<dyn GroupLister> { Arc::new(client.clone()) })
}

/// [`SnapshotSource`] reading served API groups through a [`GroupLister`].
#[derive(Clone)]
pub struct ClusterCapabilities {
    lister: Arc<dyn GroupLister>,
}

impl ClusterCapabilities {
    /// Observe the groups reported by `lister`.
    #[must_use]
    pub fn new(lister: Arc<dyn GroupLister>) -> Self {
        Self { lister }
    }
}

impl SnapshotSource for ClusterCapabilities {
    type Snapshot = ClusterState;

    fn kind(&self) -> &'static str {
        "cluster"
    }

    fn capture(&self) -> Pin<Box<dyn Future<Output = ClusterState> + Send + '_>> {
        Box::pin(async move {
            match self.lister.list_groups().await {
                Ok(groups) => ClusterState::from_groups(groups),
                Err(err) => {
                    debug!(%err, "failed to list api groups");
                    ClusterState::default()
                }
            }
        })
    }
}

/// Watcher over a cluster's API surface.
pub type ClusterCapabilityWatcher = PollingWatcher<ClusterCapabilities>;

/// Create an idle cluster capability watcher with the configured timings.
#[must_use]
pub fn cluster_capability_watcher(
    lister: Arc<dyn GroupLister>,
    config: &WatchConfig,
) -> ClusterCapabilityWatcher {
    PollingWatcher::new(
        ClusterCapabilities::new(lister),
        config.cluster_poll_interval,
        config.cluster_debounce_window,
    )
}
