//! Debounced change watchers.
//!
//! Every watcher implements the [`Watcher`] contract: [`Watcher::watch`]
//! starts one background loop that reports debounced changes through an
//! [`OnChange`] callback, and [`Watcher::close`] stops it again. A closed
//! watcher can be started again with a fresh callback.
//!
//! The lifecycle bookkeeping shared by all implementations lives in
//! `Lifecycle`: a started flag, the stop token of the running generation,
//! the loop task handle, and at most one pending debounce timer.

pub mod cluster;
pub mod kubeconfig;
pub mod polling;
pub mod workspace;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;

pub use cluster::{
    ClusterCapabilities, ClusterCapabilityWatcher, ClusterState, GroupLister, GroupListerFactory,
};
pub use kubeconfig::KubeconfigWatcher;
pub use polling::{PollingWatcher, SnapshotSource};
pub use workspace::{WorkspaceTree, WorkspaceTreeWatcher};

/// Future returned by an [`OnChange`] callback.
pub type ChangeFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Callback invoked after a debounced change has been confirmed.
///
/// A returned error is logged; it never stops the watcher.
pub type OnChange = Arc<dyn Fn() -> ChangeFuture + Send + Sync>;

/// Wrap an async closure into an [`OnChange`] callback.
pub fn on_change<F, Fut>(callback: F) -> OnChange
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || -> ChangeFuture { Box::pin(callback()) })
}

/// Contract shared by all change watchers.
pub trait Watcher: Send + Sync {
    /// Start background monitoring.
    ///
    /// No-op when the watcher is already running. Never blocks: the loop
    /// (including its initial snapshot) runs on its own task.
    fn watch(&self, on_change: OnChange);

    /// Stop background monitoring and wait for the loop to exit.
    ///
    /// Idempotent, and safe to call on a watcher that was never started.
    /// A pending debounce timer is cancelled before the loop is signalled,
    /// so it will not fire after this returns.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Per-instance lifecycle state: `Idle -> Started -> Idle`.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    started: bool,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
    timer: Option<CancellationToken>,
}

impl Lifecycle {
    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// Mark the watcher started and hand out the stop token of the new
    /// generation. Returns `None` when already started.
    pub(crate) fn start(&mut self) -> Option<CancellationToken> {
        if self.started {
            return None;
        }
        self.started = true;
        Some(self.stop.clone())
    }

    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Cancel any pending timer and schedule `fire` after `window`.
    ///
    /// Refuses to arm once `generation` has been stopped, so a loop that is
    /// on its way out can never leave a timer behind.
    pub(crate) fn rearm<F>(&mut self, generation: &CancellationToken, window: Duration, fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if generation.is_cancelled() {
            return false;
        }
        if let Some(previous) = self.timer.take() {
            previous.cancel();
        }
        let timer = generation.child_token();
        self.timer = Some(timer.clone());
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(window) => fire.await,
            }
        });
        true
    }

    /// Cancel the pending timer, signal the loop and reset for the next
    /// generation. Returns the loop task to wait on, if one was running.
    pub(crate) fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        if !self.started {
            return None;
        }
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.stop.cancel();
        self.stop = CancellationToken::new();
        self.started = false;
        self.task.take()
    }
}

/// Wait for a stopped loop task to finish.
///
/// Skips the wait when called from the loop task itself, which would
/// otherwise never complete.
pub(crate) async fn wait_for_exit(task: Option<JoinHandle<()>>) {
    let Some(task) = task else {
        return;
    };
    if tokio::task::try_id() == Some(task.id()) {
        debug!("close called from the watch loop; not waiting for it");
        return;
    }
    if let Err(err) = task.await {
        if err.is_panic() {
            warn!(%err, "watch loop panicked");
        }
    }
}
