//! Workspace tree discovery over the kcp tenancy API.
//!
//! [`discover_workspaces`] walks the tree from a root path with an explicit
//! worklist. Every full path is visited at most once, so cycles and
//! duplicate child reports terminate, and a workspace whose children cannot
//! be listed is treated as a leaf instead of aborting the walk.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::config::Kubeconfig;
use kube::core::GroupVersionKind;
use kube::Client;
use tracing::{debug, info};

use super::addressing::{child_path, parse_server_url, workspace_rest_config};
use crate::Result;

/// API group of kcp workspace objects.
pub const TENANCY_GROUP: &str = "tenancy.kcp.io";
/// API version of kcp workspace objects.
pub const TENANCY_VERSION: &str = "v1alpha1";
/// Kind of kcp workspace objects.
pub const WORKSPACE_KIND: &str = "Workspace";
/// Plural resource name of kcp workspace objects.
pub const WORKSPACE_PLURAL: &str = "workspaces";

/// The `(group, version, resource)` of kcp workspaces.
#[must_use]
pub fn workspace_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(TENANCY_GROUP, TENANCY_VERSION, WORKSPACE_KIND),
        WORKSPACE_PLURAL,
    )
}

/// Lists the direct children of a workspace.
pub trait WorkspaceLister: Send + Sync {
    /// Local names of the direct children of `workspace`.
    fn list_children<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;
}

/// Builds the lister used for a given base REST config.
pub type ListerFactory = Arc<dyn Fn(&kube::Config) -> Arc<dyn WorkspaceLister> + Send + Sync>;

/// [`ListerFactory`] producing [`TenancyClient`]s.
#[must_use]
pub fn tenancy_lister_factory() -> ListerFactory {
    Arc::new(|config: &kube::Config| -> Arc<dyn WorkspaceLister> {
        Arc::new(TenancyClient::new(config.clone()))
    })
}

/// [`WorkspaceLister`] backed by the tenancy API.
///
/// Each listing goes through a client whose host addresses the workspace
/// being listed.
#[derive(Clone)]
pub struct TenancyClient {
    base: kube::Config,
    resource: ApiResource,
}

impl TenancyClient {
    /// Create a lister deriving per-workspace clients from `base`.
    #[must_use]
    pub fn new(base: kube::Config) -> Self {
        Self {
            base,
            resource: workspace_resource(),
        }
    }

    async fn list(&self, workspace: &str) -> Result<Vec<String>> {
        let config = workspace_rest_config(&self.base, workspace)?;
        let client = Client::try_from(config)?;
        let api: Api<DynamicObject> = Api::all_with(client, &self.resource);
        let list = api.list_metadata(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|item| item.metadata.name)
            .collect())
    }
}

impl WorkspaceLister for TenancyClient {
    fn list_children<'a>(
        &'a self,
        workspace: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(self.list(workspace))
    }
}

/// Outcome of a tree walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredWorkspaces {
    /// Every reachable workspace path, root included, sorted.
    pub paths: Vec<String>,
    /// Workspaces whose children could not be listed, sorted.
    pub unreachable: Vec<String>,
}

impl DiscoveredWorkspaces {
    /// Whether listing the children of `workspace` failed.
    #[must_use]
    pub fn is_unreachable(&self, workspace: &str) -> bool {
        self.unreachable.iter().any(|w| w == workspace)
    }
}

/// Walk the workspace tree below `root`.
pub async fn discover_workspaces(lister: &dyn WorkspaceLister, root: &str) -> DiscoveredWorkspaces {
    let mut discovered: HashSet<String> = HashSet::from([root.to_owned()]);
    let mut unreachable = BTreeSet::new();
    let mut pending = vec![root.to_owned()];

    while let Some(current) = pending.pop() {
        let children = match lister.list_children(&current).await {
            Ok(children) => children,
            Err(err) => {
                debug!(workspace = %current, %err, "failed to list child workspaces");
                unreachable.insert(current);
                continue;
            }
        };
        let mut fresh = Vec::new();
        for child in children.iter().filter(|c| !c.is_empty()) {
            let full = child_path(&current, child);
            if discovered.insert(full.clone()) {
                fresh.push(full);
            }
        }
        // reversed so siblings are visited in listing order
        pending.extend(fresh.into_iter().rev());
    }

    let mut paths: Vec<String> = discovered.into_iter().collect();
    paths.sort();
    info!(root, count = paths.len(), "discovered workspaces");
    DiscoveredWorkspaces {
        paths,
        unreachable: unreachable.into_iter().collect(),
    }
}

/// Workspace paths embedded in the cluster server URLs of `kubeconfig`.
#[must_use]
pub fn workspaces_from_kubeconfig(kubeconfig: &Kubeconfig) -> Vec<String> {
    kubeconfig
        .clusters
        .iter()
        .filter_map(|named| named.cluster.as_ref()?.server.as_deref())
        .map(|server| parse_server_url(server).1)
        .filter(|workspace| !workspace.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
