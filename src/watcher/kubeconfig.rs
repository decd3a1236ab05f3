//! Kubeconfig file watcher.
//!
//! Uses the `notify` crate instead of polling, but shares the debounce and
//! lifecycle handling of the other watchers: each relevant file-system
//! event (re)arms the debounce timer, and the callback runs once the files
//! have been quiet for the debounce window.
//!
//! The parent directory of each kubeconfig file is watched (not the file
//! itself) so that atomic rename-based writes are detected. Events are
//! filtered down to the watched file names.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{wait_for_exit, Lifecycle, OnChange, Watcher};
use crate::config::WatchConfig;
use crate::{AppError, Result};

struct Shared {
    paths: Vec<PathBuf>,
    file_names: BTreeSet<OsString>,
    debounce_window: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debounced watcher over one or more kubeconfig files.
///
/// Cloning yields another handle to the same watcher.
#[derive(Clone)]
pub struct KubeconfigWatcher {
    shared: Arc<Shared>,
}

impl KubeconfigWatcher {
    /// Create an idle watcher for `paths`.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, debounce_window: Duration) -> Self {
        let file_names = paths
            .iter()
            .filter_map(|p| p.file_name().map(ToOwned::to_owned))
            .collect();
        Self {
            shared: Arc::new(Shared {
                paths,
                file_names,
                debounce_window,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Create an idle watcher with the configured debounce window.
    #[must_use]
    pub fn with_config(paths: Vec<PathBuf>, config: &WatchConfig) -> Self {
        Self::new(paths, config.kubeconfig_debounce_window)
    }

    /// The kubeconfig files being watched.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.shared.paths
    }

    /// Whether a watch loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle().is_started()
    }

    fn file_watcher(&self, events: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher> {
        if self.shared.paths.is_empty() {
            return Err(AppError::Watch("no kubeconfig files to watch".into()));
        }
        let names = self.shared.file_names.clone();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_kubeconfig_change(&event, &names) => {
                    let _ = events.send(());
                }
                Err(err) => {
                    warn!(%err, "kubeconfig file watcher error");
                }
                _ => {}
            },
        )?;

        let targets: BTreeSet<&Path> = self
            .shared
            .paths
            .iter()
            .map(PathBuf::as_path)
            .map(watch_target)
            .collect();
        for target in targets {
            watcher
                .watch(target, RecursiveMode::NonRecursive)
                .map_err(|err| {
                    AppError::Watch(format!(
                        "failed to watch kubeconfig path '{}': {err}",
                        target.display()
                    ))
                })?;
        }
        Ok(watcher)
    }
}

impl Watcher for KubeconfigWatcher {
    fn watch(&self, on_change: OnChange) {
        let mut lifecycle = self.shared.lifecycle();
        if lifecycle.is_started() {
            debug!("kubeconfig watcher already running");
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let file_watcher = match self.file_watcher(tx) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(%err, "kubeconfig watcher not started");
                return;
            }
        };
        let Some(stop) = lifecycle.start() else {
            return;
        };
        let task = tokio::spawn(
            run(Arc::clone(&self.shared), file_watcher, rx, stop, on_change)
                .instrument(info_span!("kubeconfig_watcher")),
        );
        lifecycle.attach(task);
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let task = self.shared.lifecycle().shutdown();
            wait_for_exit(task).await;
        })
    }
}

async fn run(
    shared: Arc<Shared>,
    file_watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<()>,
    stop: CancellationToken,
    on_change: OnChange,
) {
    info!(paths = ?shared.paths, "kubeconfig watcher started");
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            event = events.recv() => {
                if event.is_none() {
                    break;
                }
                let fire = fire(Arc::clone(&on_change)).in_current_span();
                shared.lifecycle().rearm(&stop, shared.debounce_window, fire);
            }
        }
    }
    drop(file_watcher);
    debug!("kubeconfig watcher stopped");
}

async fn fire(on_change: OnChange) {
    if let Err(err) = on_change().await {
        warn!(%err, "kubeconfig change callback failed");
    }
}

/// Directory to register with `notify` for a kubeconfig file.
fn watch_target(path: &Path) -> &Path {
    path.parent().filter(|p| p != &Path::new("")).unwrap_or(path)
}

/// Returns `true` for create, modify and remove events touching one of the
/// watched file names.
fn is_kubeconfig_change(event: &Event, names: &BTreeSet<OsString>) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|name| names.contains(name)))
}
