//! Multi-workspace cluster provider.
//!
//! Resolves the default workspace from the active kubeconfig, discovers the
//! workspace tree below it, and hands out one lazily-built [`Manager`] per
//! workspace. Three watchers keep the picture current:
//!
//! - workspace tree and kubeconfig changes trigger a full reset (fresh
//!   kubeconfig, re-discovery, new cache, new watchers) followed by the
//!   caller's reload;
//! - cluster capability changes call the caller's reload directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{debug, info, info_span, warn, Instrument};

use super::addressing::{parse_server_url, workspace_rest_config};
use super::discovery::{
    discover_workspaces, tenancy_lister_factory, workspaces_from_kubeconfig, ListerFactory,
    WorkspaceLister,
};
use super::manager::{context_for_workspace, server_for_context, Manager};
use crate::config::GlobalConfig;
use crate::watcher::cluster::{
    client_group_lister_factory, cluster_capability_watcher, GroupListerFactory,
};
use crate::watcher::workspace::workspace_tree_watcher;
use crate::watcher::{
    on_change, ClusterCapabilityWatcher, KubeconfigWatcher, OnChange, Watcher, WorkspaceTreeWatcher,
};
use crate::{AppError, Result};

/// Cache state of one workspace.
#[derive(Debug, Clone)]
pub enum ManagerEntry {
    /// Never discovered.
    Unknown,
    /// Discovered, manager not built yet.
    Pending,
    /// Manager built and shared.
    Ready(Arc<Manager>),
}

/// Everything derived from one kubeconfig read; replaced wholesale on reset.
struct Targets {
    kubeconfig: Kubeconfig,
    current_context: String,
    base_url: String,
    default_workspace: String,
    base: Arc<Manager>,
    lister: Arc<dyn WorkspaceLister>,
    managers: HashMap<String, ManagerEntry>,
}

impl Targets {
    async fn load(config: &GlobalConfig, lister_factory: &ListerFactory) -> Result<Self> {
        let kubeconfig = read_kubeconfig(config)?;
        let current_context = config
            .context
            .clone()
            .or_else(|| kubeconfig.current_context.clone())
            .filter(|ctx| !ctx.is_empty())
            .ok_or_else(|| AppError::Kubeconfig("no current context set".into()))?;
        let server = server_for_context(&kubeconfig, &current_context)?;
        let (base_url, default_workspace) = parse_server_url(&server);
        if default_workspace.is_empty() {
            return Err(AppError::Kubeconfig(format!(
                "server '{server}' of context '{current_context}' does not address a workspace"
            )));
        }

        let rest = kube::Config::from_custom_kubeconfig(
            kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(current_context.clone()),
                ..KubeConfigOptions::default()
            },
        )
        .await?;
        let base = Arc::new(Manager::new(
            default_workspace.clone(),
            rest,
            kubeconfig.clone(),
            current_context.clone(),
        )?);
        let lister = lister_factory(base.config());

        let discovery = discover_workspaces(lister.as_ref(), &default_workspace).await;
        let workspaces = if discovery.is_unreachable(&default_workspace) {
            warn!(
                workspace = %default_workspace,
                "workspace API unavailable; using workspaces named in kubeconfig"
            );
            workspaces_from_kubeconfig(&kubeconfig)
        } else {
            discovery.paths
        };

        let mut managers: HashMap<String, ManagerEntry> = workspaces
            .into_iter()
            .map(|ws| (ws, ManagerEntry::Pending))
            .collect();
        managers.insert(default_workspace.clone(), ManagerEntry::Ready(Arc::clone(&base)));
        info!(
            default = %default_workspace,
            count = managers.len(),
            "workspace targets loaded"
        );

        Ok(Self {
            kubeconfig,
            current_context,
            base_url,
            default_workspace,
            base,
            lister,
            managers,
        })
    }

    fn entry(&self, workspace: &str) -> ManagerEntry {
        self.managers
            .get(workspace)
            .cloned()
            .unwrap_or(ManagerEntry::Unknown)
    }

    fn build_manager(&self, workspace: &str) -> Result<Arc<Manager>> {
        let rest = workspace_rest_config(self.base.config(), workspace)?;
        let (view, context) = context_for_workspace(
            &self.kubeconfig,
            &self.current_context,
            &self.base_url,
            workspace,
        )?;
        debug!(workspace, context = %context, "building workspace manager");
        Ok(Arc::new(Manager::new(workspace, rest, view, context)?))
    }
}

fn read_kubeconfig(config: &GlobalConfig) -> Result<Kubeconfig> {
    let kubeconfig = match &config.kubeconfig {
        Some(path) => Kubeconfig::read_from(path)?,
        None => Kubeconfig::read()?,
    };
    Ok(kubeconfig)
}

/// The three watchers of one provider generation.
struct Watchers {
    cluster: ClusterCapabilityWatcher,
    workspaces: WorkspaceTreeWatcher,
    kubeconfig: KubeconfigWatcher,
}

impl Watchers {
    fn new(config: &GlobalConfig, targets: &Targets, group_listers: &GroupListerFactory) -> Self {
        let groups = group_listers(&targets.base.client());
        Self {
            cluster: cluster_capability_watcher(groups, &config.watch),
            workspaces: workspace_tree_watcher(
                Arc::clone(&targets.lister),
                targets.default_workspace.clone(),
                &config.watch,
            ),
            kubeconfig: KubeconfigWatcher::with_config(config.kubeconfig_paths(), &config.watch),
        }
    }

    async fn close(self) {
        futures_util::future::join3(
            self.cluster.close(),
            self.workspaces.close(),
            self.kubeconfig.close(),
        )
        .await;
    }
}

struct Inner {
    config: Arc<GlobalConfig>,
    lister_factory: ListerFactory,
    group_listers: GroupListerFactory,
    targets: RwLock<Targets>,
    watchers: Mutex<Option<Watchers>>,
    /// Reload callback of the last `watch_targets` call.
    reload: Mutex<Option<OnChange>>,
    /// Serializes resets against each other and against `close`.
    resets: tokio::sync::Mutex<()>,
    /// Only set while holding `resets`.
    closed: AtomicBool,
}

impl Inner {
    fn watchers(&self) -> MutexGuard<'_, Option<Watchers>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reload(&self) -> MutexGuard<'_, Option<OnChange>> {
        self.reload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn reset(self: &Arc<Self>) -> Result<()> {
        let _serial = self.resets.lock().await;
        if self.is_closed() {
            debug!("provider closed; skipping reset");
            return Ok(());
        }
        let targets = Targets::load(&self.config, &self.lister_factory).await?;
        let fresh = Watchers::new(&self.config, &targets, &self.group_listers);
        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
        let previous = self.watchers().replace(fresh);
        let reload = self.reload().clone();
        if let Some(reload) = reload {
            self.arm(&reload);
        }
        if let Some(previous) = previous {
            previous.close().await;
        }
        info!("provider reset");
        Ok(())
    }

    async fn close(&self) {
        let _serial = self.resets.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.reload().take();
        let watchers = self.watchers().take();
        if let Some(watchers) = watchers {
            watchers.close().await;
        }
    }

    fn arm(self: &Arc<Self>, reload: &OnChange) {
        if self.is_closed() {
            warn!("provider closed; not watching targets");
            return;
        }
        let guard = self.watchers();
        let Some(watchers) = guard.as_ref() else {
            warn!("provider closed; not watching targets");
            return;
        };
        let reset_then_reload = reset_callback(Arc::downgrade(self), Arc::clone(reload));
        watchers.cluster.watch(Arc::clone(reload));
        watchers.workspaces.watch(Arc::clone(&reset_then_reload));
        watchers.kubeconfig.watch(reset_then_reload);
    }
}

/// Callback that resets the provider, which re-arms its fresh watchers,
/// then runs `reload`.
fn reset_callback(provider: Weak<Inner>, reload: OnChange) -> OnChange {
    on_change(move || {
        let provider = provider.clone();
        let reload = Arc::clone(&reload);
        async move {
            let Some(inner) = provider.upgrade() else {
                return Ok(());
            };
            inner
                .reset()
                .instrument(info_span!("provider_reset"))
                .await?;
            if inner.is_closed() {
                return Ok(());
            }
            reload().await
        }
    })
}

/// Provider exposing every discovered kcp workspace as a target.
///
/// Cloning yields another handle to the same provider.
#[derive(Clone)]
pub struct MultiWorkspaceProvider {
    inner: Arc<Inner>,
}

impl MultiWorkspaceProvider {
    /// Build a provider listing workspaces through the tenancy API.
    ///
    /// `config` is used as given; see [`GlobalConfig::from_env`] for the
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if the kubeconfig cannot be read, has no usable current
    /// context, its server URL does not address a workspace, or the base
    /// client cannot be built.
    pub async fn new(config: Arc<GlobalConfig>) -> Result<Self> {
        Self::with_lister_factory(config, tenancy_lister_factory()).await
    }

    /// Build a provider with a custom workspace lister.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub async fn with_lister_factory(
        config: Arc<GlobalConfig>,
        lister_factory: ListerFactory,
    ) -> Result<Self> {
        Self::with_factories(config, lister_factory, client_group_lister_factory()).await
    }

    /// Build a provider with custom workspace and API group listers.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub async fn with_factories(
        config: Arc<GlobalConfig>,
        lister_factory: ListerFactory,
        group_listers: GroupListerFactory,
    ) -> Result<Self> {
        let targets = Targets::load(&config, &lister_factory).await?;
        let watchers = Watchers::new(&config, &targets, &group_listers);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                lister_factory,
                group_listers,
                targets: RwLock::new(targets),
                watchers: Mutex::new(Some(watchers)),
                reload: Mutex::new(None),
                resets: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn targets_read(&self) -> std::sync::RwLockReadGuard<'_, Targets> {
        self.inner
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// All known workspace paths, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.targets_read().managers.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// The workspace the kubeconfig's current context points at.
    #[must_use]
    pub fn default_target(&self) -> String {
        self.targets_read().default_workspace.clone()
    }

    /// Cache state of `workspace`.
    #[must_use]
    pub fn entry(&self, workspace: &str) -> ManagerEntry {
        self.targets_read().entry(workspace)
    }

    /// Manager for `workspace`; an empty name means the default workspace.
    ///
    /// Builds and caches the manager on first use. Must be called within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a workspace that was never
    /// discovered, or the construction error of its manager.
    pub fn derived_kubernetes(&self, workspace: &str) -> Result<Arc<Manager>> {
        if workspace.is_empty() {
            let default = self.default_target();
            return self.manager_for_workspace(&default);
        }
        self.manager_for_workspace(workspace)
    }

    fn manager_for_workspace(&self, workspace: &str) -> Result<Arc<Manager>> {
        let cached = self.targets_read().entry(workspace);
        match cached {
            ManagerEntry::Ready(manager) => return Ok(manager),
            ManagerEntry::Unknown => {
                return Err(AppError::NotFound(format!("workspace {workspace} not found")))
            }
            ManagerEntry::Pending => {}
        }

        let mut targets = self
            .inner
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // another caller may have built it, or a reset dropped it, meanwhile
        match targets.entry(workspace) {
            ManagerEntry::Ready(manager) => Ok(manager),
            ManagerEntry::Unknown => Err(AppError::NotFound(format!(
                "workspace {workspace} not found"
            ))),
            ManagerEntry::Pending => {
                let manager = targets.build_manager(workspace)?;
                targets.managers.insert(
                    workspace.to_owned(),
                    ManagerEntry::Ready(Arc::clone(&manager)),
                );
                Ok(manager)
            }
        }
    }

    /// Whether the default workspace is `OpenShift`-like.
    ///
    /// Never builds a manager; reports `false` when the default manager is
    /// not built.
    pub async fn is_openshift(&self) -> bool {
        let entry = {
            let targets = self.targets_read();
            targets.entry(&targets.default_workspace)
        };
        match entry {
            ManagerEntry::Ready(manager) => manager.is_openshift().await,
            ManagerEntry::Pending | ManagerEntry::Unknown => false,
        }
    }

    /// Watch for target changes.
    ///
    /// Workspace tree and kubeconfig changes reset the provider before
    /// `reload` runs; cluster capability changes run `reload` directly.
    /// `reload` stays registered across resets. Watchers that are already
    /// running keep their callback until the next reset.
    pub fn watch_targets(&self, reload: OnChange) {
        if self.inner.is_closed() {
            warn!("provider closed; not watching targets");
            return;
        }
        self.inner.reload().replace(Arc::clone(&reload));
        self.inner.arm(&reload);
    }

    /// Re-read the kubeconfig, re-discover workspaces and rebuild the cache.
    ///
    /// The new watchers are armed with the callback of the last
    /// [`Self::watch_targets`] call, if any. No-op once closed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`]; the previous state is kept on failure.
    pub async fn reset(&self) -> Result<()> {
        self.inner
            .reset()
            .instrument(info_span!("provider_reset"))
            .await
    }

    /// Stop all watchers for good.
    ///
    /// Waits for a reset in progress to finish first, so no watcher is
    /// started after this returns. Safe to call more than once.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
