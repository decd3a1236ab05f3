//! Per-workspace client handle and kubeconfig context resolution.

use kube::config::{Kubeconfig, NamedCluster, NamedContext};
use kube::Client;
use tracing::debug;

use super::addressing::{construct_workspace_url, parse_server_url};
use crate::watcher::cluster::OPENSHIFT_API_GROUP;
use crate::{AppError, Result};

/// Configuration and client for operating against one workspace.
///
/// Immutable once built; shared between callers through `Arc`.
pub struct Manager {
    workspace: String,
    config: kube::Config,
    client: Client,
    kubeconfig: Kubeconfig,
    context: String,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("workspace", &self.workspace)
            .field("cluster_url", &self.config.cluster_url)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Build a manager from a REST config and the kubeconfig view it was
    /// resolved from.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Kube` if the client cannot be constructed.
    pub fn new(
        workspace: impl Into<String>,
        config: kube::Config,
        kubeconfig: Kubeconfig,
        context: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::try_from(config.clone())?;
        Ok(Self {
            workspace: workspace.into(),
            config,
            client,
            kubeconfig,
            context: context.into(),
        })
    }

    /// Workspace path this manager targets.
    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// A client for the workspace.
    #[must_use]
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// REST config the client was built from.
    #[must_use]
    pub fn config(&self) -> &kube::Config {
        &self.config
    }

    /// Kubeconfig view, possibly holding synthesized in-memory entries.
    #[must_use]
    pub fn kubeconfig(&self) -> &Kubeconfig {
        &self.kubeconfig
    }

    /// Name of the context in [`Self::kubeconfig`] targeting the workspace.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether the workspace serves the `OpenShift` project API.
    ///
    /// Lookup failures count as "no".
    pub async fn is_openshift(&self) -> bool {
        match self.client.list_api_groups().await {
            Ok(list) => list.groups.iter().any(|g| g.name == OPENSHIFT_API_GROUP),
            Err(err) => {
                debug!(workspace = %self.workspace, %err, "api group lookup failed");
                false
            }
        }
    }
}

/// Name of the synthesized cluster entry for `workspace`.
#[must_use]
pub fn synthesized_cluster_name(workspace: &str) -> String {
    format!("kcp-cluster-{workspace}")
}

/// Name of the synthesized context entry for `workspace`.
#[must_use]
pub fn synthesized_context_name(workspace: &str) -> String {
    format!("kcp-{workspace}")
}

/// Server URL of the cluster referenced by context `context`.
///
/// # Errors
///
/// Returns `AppError::Kubeconfig` if the context, its cluster, or the
/// cluster's server is missing.
pub fn server_for_context(kubeconfig: &Kubeconfig, context: &str) -> Result<String> {
    let ctx = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context)
        .and_then(|c| c.context.as_ref())
        .ok_or_else(|| AppError::Kubeconfig(format!("context '{context}' not found")))?;
    kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == ctx.cluster)
        .and_then(|c| c.cluster.as_ref())
        .and_then(|c| c.server.clone())
        .ok_or_else(|| {
            AppError::Kubeconfig(format!(
                "cluster '{}' of context '{context}' has no server",
                ctx.cluster
            ))
        })
}

/// Find or synthesize a kubeconfig context targeting `workspace`.
///
/// An existing context wins when its cluster URL already addresses the
/// workspace. Otherwise a cluster/context pair is added to a copy of
/// `kubeconfig`, cloned from `current_context` with the server rewritten to
/// the workspace URL on `base_url`. The copy is never persisted.
///
/// Returns the kubeconfig view and the context name within it.
///
/// # Errors
///
/// Returns `AppError::Kubeconfig` if a context has to be synthesized but
/// `current_context` or its cluster is missing.
pub fn context_for_workspace(
    kubeconfig: &Kubeconfig,
    current_context: &str,
    base_url: &str,
    workspace: &str,
) -> Result<(Kubeconfig, String)> {
    if let Some(existing) = find_workspace_context(kubeconfig, workspace) {
        let mut view = kubeconfig.clone();
        view.current_context = Some(existing.clone());
        return Ok((view, existing));
    }

    let current = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == current_context)
        .and_then(|c| c.context.clone())
        .ok_or_else(|| {
            AppError::Kubeconfig(format!("current context '{current_context}' not found"))
        })?;
    let mut cluster = kubeconfig
        .clusters
        .iter()
        .find(|c| c.name == current.cluster)
        .and_then(|c| c.cluster.clone())
        .ok_or_else(|| {
            AppError::Kubeconfig(format!("cluster '{}' not found", current.cluster))
        })?;

    let cluster_name = synthesized_cluster_name(workspace);
    let context_name = synthesized_context_name(workspace);
    cluster.server = Some(construct_workspace_url(base_url, workspace));
    let mut context = current;
    context.cluster.clone_from(&cluster_name);

    let mut view = kubeconfig.clone();
    view.clusters.retain(|c| c.name != cluster_name);
    view.contexts.retain(|c| c.name != context_name);
    view.clusters.push(NamedCluster {
        name: cluster_name,
        cluster: Some(cluster),
    });
    view.contexts.push(NamedContext {
        name: context_name.clone(),
        context: Some(context),
    });
    view.current_context = Some(context_name.clone());
    debug!(workspace, context = %context_name, "synthesized kubeconfig context");
    Ok((view, context_name))
}

fn find_workspace_context(kubeconfig: &Kubeconfig, workspace: &str) -> Option<String> {
    kubeconfig.contexts.iter().find_map(|named| {
        let ctx = named.context.as_ref()?;
        let server = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == ctx.cluster)?
            .cluster
            .as_ref()?
            .server
            .as_deref()?;
        (parse_server_url(server).1 == workspace).then(|| named.name.clone())
    })
}
