//! Generic poll-based, debounced change watcher.
//!
//! A [`PollingWatcher`] captures a snapshot from its [`SnapshotSource`] on
//! every tick and compares it with the last known snapshot. A difference
//! (re)arms the debounce timer; when the timer fires the callback runs and,
//! only if it succeeds, a freshly captured snapshot becomes the new
//! baseline. That fresh capture may already differ from the snapshot that
//! triggered the timer; such a change is not reported again until it
//! differs from the new baseline.
//!
//! A snapshot that already armed the pending timer does not re-arm it on
//! later ticks, so a change that persists still fires once its window has
//! elapsed, even when the poll interval is shorter than the window.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{wait_for_exit, Lifecycle, OnChange, Watcher};

/// Something a [`PollingWatcher`] can take comparable snapshots of.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Immutable point-in-time view; equality decides "changed".
    type Snapshot: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Short label used in log fields.
    fn kind(&self) -> &'static str;

    /// Capture the current state.
    ///
    /// Failures are the source's business: they are logged there and
    /// reported as an empty snapshot.
    fn capture(&self) -> Pin<Box<dyn Future<Output = Self::Snapshot> + Send + '_>>;
}

struct PollState<T> {
    last: Option<T>,
    /// Snapshot that armed the pending timer.
    pending: Option<T>,
    lifecycle: Lifecycle,
}

struct Shared<S: SnapshotSource> {
    source: S,
    poll_interval: Duration,
    debounce_window: Duration,
    state: Mutex<PollState<S::Snapshot>>,
}

impl<S: SnapshotSource> Shared<S> {
    fn state(&self) -> MutexGuard<'_, PollState<S::Snapshot>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Poll-based debounced watcher over a [`SnapshotSource`].
///
/// Cloning yields another handle to the same watcher.
pub struct PollingWatcher<S: SnapshotSource> {
    shared: Arc<Shared<S>>,
}

impl<S: SnapshotSource> Clone for PollingWatcher<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: SnapshotSource> PollingWatcher<S> {
    /// Create an idle watcher.
    #[must_use]
    pub fn new(source: S, poll_interval: Duration, debounce_window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                poll_interval,
                debounce_window,
                state: Mutex::new(PollState {
                    last: None,
                    pending: None,
                    lifecycle: Lifecycle::default(),
                }),
            }),
        }
    }

    /// The snapshot changes are currently compared against.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<S::Snapshot> {
        self.shared.state().last.clone()
    }

    /// Whether a watch loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state().lifecycle.is_started()
    }

    /// The source being polled.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.shared.source
    }
}

impl<S: SnapshotSource> Watcher for PollingWatcher<S> {
    fn watch(&self, on_change: OnChange) {
        let mut state = self.shared.state();
        let Some(stop) = state.lifecycle.start() else {
            debug!(kind = self.shared.source.kind(), "watcher already running");
            return;
        };
        let span = info_span!("polling_watcher", kind = self.shared.source.kind());
        let task = tokio::spawn(run(Arc::clone(&self.shared), stop, on_change).instrument(span));
        state.lifecycle.attach(task);
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let task = self.shared.state().lifecycle.shutdown();
            wait_for_exit(task).await;
        })
    }
}

async fn run<S: SnapshotSource>(shared: Arc<Shared<S>>, stop: CancellationToken, on_change: OnChange) {
    let initial = tokio::select! {
        () = stop.cancelled() => return,
        snapshot = shared.source.capture() => snapshot,
    };
    {
        let mut state = shared.state();
        state.last = Some(initial);
        state.pending = None;
    }
    info!(interval_ms = shared.poll_interval.as_millis(), "watch loop started");

    let mut ticker = tokio::time::interval_at(Instant::now() + shared.poll_interval, shared.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let current = tokio::select! {
            () = stop.cancelled() => break,
            snapshot = shared.source.capture() => snapshot,
        };
        observe(&shared, &stop, current, &on_change);
    }
    debug!("watch loop stopped");
}

/// Compare `current` with the baseline and arm the debounce timer on change.
fn observe<S: SnapshotSource>(
    shared: &Arc<Shared<S>>,
    stop: &CancellationToken,
    current: S::Snapshot,
    on_change: &OnChange,
) {
    let mut state = shared.state();
    if state.last.as_ref() == Some(&current) || state.pending.as_ref() == Some(&current) {
        return;
    }
    debug!(previous = ?state.last, current = ?current, "change detected; debouncing");
    let fire = fire(Arc::clone(shared), stop.clone(), Arc::clone(on_change)).in_current_span();
    if state.lifecycle.rearm(stop, shared.debounce_window, fire) {
        state.pending = Some(current);
    }
}

async fn fire<S: SnapshotSource>(
    shared: Arc<Shared<S>>,
    generation: CancellationToken,
    on_change: OnChange,
) {
    if let Err(err) = on_change().await {
        warn!(%err, kind = shared.source.kind(), "change callback failed");
        shared.state().pending = None;
        return;
    }
    if generation.is_cancelled() {
        debug!(kind = shared.source.kind(), "watcher closed by callback; keeping baseline");
        shared.state().pending = None;
        return;
    }
    let refreshed = shared.source.capture().await;
    let mut state = shared.state();
    state.last = Some(refreshed);
    state.pending = None;
}
