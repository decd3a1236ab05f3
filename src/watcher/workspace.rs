//! kcp workspace tree watcher.
//!
//! Polls the tenancy API for the sorted names of the workspaces directly
//! below one workspace.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use super::polling::{PollingWatcher, SnapshotSource};
use crate::config::WatchConfig;
use crate::kcp::discovery::WorkspaceLister;

/// [`SnapshotSource`] listing child workspaces of one workspace.
#[derive(Clone)]
pub struct WorkspaceTree {
    lister: Arc<dyn WorkspaceLister>,
    workspace: String,
}

impl WorkspaceTree {
    /// Observe the children of `workspace` through `lister`.
    #[must_use]
    pub fn new(lister: Arc<dyn WorkspaceLister>, workspace: impl Into<String>) -> Self {
        Self {
            lister,
            workspace: workspace.into(),
        }
    }

    /// The workspace whose children are observed.
    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }
}

impl SnapshotSource for WorkspaceTree {
    type Snapshot = Vec<String>;

    fn kind(&self) -> &'static str {
        "workspace"
    }

    fn capture(&self) -> Pin<Box<dyn Future<Output = Vec<String>> + Send + '_>> {
        Box::pin(async move {
            match self.lister.list_children(&self.workspace).await {
                Ok(mut names) => {
                    names.sort();
                    names
                }
                Err(err) => {
                    debug!(workspace = %self.workspace, %err, "failed to list workspaces");
                    Vec::new()
                }
            }
        })
    }
}

/// Watcher over the workspaces below one workspace.
pub type WorkspaceTreeWatcher = PollingWatcher<WorkspaceTree>;

/// Create an idle workspace tree watcher with the configured timings.
#[must_use]
pub fn workspace_tree_watcher(
    lister: Arc<dyn WorkspaceLister>,
    workspace: impl Into<String>,
    config: &WatchConfig,
) -> WorkspaceTreeWatcher {
    PollingWatcher::new(
        WorkspaceTree::new(lister, workspace),
        config.workspace_poll_interval,
        config.workspace_debounce_window,
    )
}
