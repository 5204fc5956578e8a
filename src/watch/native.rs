//! Notifier driven by OS file-change notifications.
//!
//! Uses `notify::RecommendedWatcher` with a tokio channel bridge. The
//! directory and its parent are watched non-recursively; the parent watch
//! is what reports the directory's own removal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CHANNEL_CAPACITY, Event, EventOp, EventSink, ListOutcome, Notifier, emit_listing};
use crate::error::{BoxError, Result};
use crate::fs::is_hidden_name;

/// Notifier backed by the platform's file watching API.
///
/// The `notify` watcher must be kept alive; dropping it deregisters the OS
/// watch and stops all event delivery.
pub struct FsNotifier {
    events: mpsc::Receiver<Event>,
    refresh_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    _watcher: notify::RecommendedWatcher,
}

impl FsNotifier {
    /// Start watching `dir`.
    ///
    /// A missing directory is not an error here: the initial listing will
    /// report it as `Destroy`.
    pub fn start(dir: &Path) -> Result<Self> {
        let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        let (bridge_tx, bridge_rx) =
            mpsc::channel::<notify::Result<notify::Event>>(CHANNEL_CAPACITY);

        // When the bridge is full the callback sets this flag instead of
        // blocking; the event loop then performs a complete listing.
        let rescan_needed = Arc::new(AtomicBool::new(false));

        let mut watcher = {
            let rescan = Arc::clone(&rescan_needed);
            notify::RecommendedWatcher::new(
                move |res: notify::Result<notify::Event>| {
                    if bridge_tx.try_send(res).is_err() && !rescan.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            "watcher channel full (capacity {CHANNEL_CAPACITY}), \
                             coalescing into full listing"
                        );
                    }
                },
                notify::Config::default(),
            )
            .map_err(|e| BoxError::Watcher(format!("failed to create filesystem watcher: {e}")))?
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            tracing::debug!("cannot watch {}: {e}", dir.display());
        }
        if let Some(parent) = dir.parent()
            && let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive)
        {
            tracing::debug!("cannot watch parent {}: {e}", parent.display());
        }

        let (tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        tokio::spawn(run_event_loop(dir, bridge_rx, refresh_rx, sink, rescan_needed));

        Ok(Self {
            events,
            refresh_tx,
            cancel,
            _watcher: watcher,
        })
    }
}

impl Notifier for FsNotifier {
    fn events(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.events
    }

    fn refresh(&self) {
        // A pending request already covers this one.
        let _ = self.refresh_tx.try_send(());
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FsNotifier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_event_loop(
    dir: PathBuf,
    mut bridge_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    mut refresh_rx: mpsc::Receiver<()>,
    sink: EventSink,
    rescan_needed: Arc<AtomicBool>,
) {
    if !listing_continues(&dir, &sink).await {
        return;
    }

    loop {
        tokio::select! {
            biased;
            _ = sink.cancel_token().cancelled() => return,
            Some(()) = refresh_rx.recv() => {
                if !listing_continues(&dir, &sink).await {
                    return;
                }
            }
            res = bridge_rx.recv() => {
                let Some(res) = res else {
                    return;
                };
                let keep_going = match res {
                    Ok(event) => process_event(&dir, event, &sink).await,
                    Err(e) => {
                        tracing::warn!("filesystem watcher error: {e}");
                        sink.send(Event::error(std::io::Error::other(e.to_string()))).await
                    }
                };
                if !keep_going {
                    return;
                }
                if rescan_needed.swap(false, Ordering::Relaxed)
                    && !listing_continues(&dir, &sink).await
                {
                    return;
                }
            }
        }
    }
}

async fn listing_continues(dir: &Path, sink: &EventSink) -> bool {
    !matches!(
        emit_listing(dir, sink).await,
        ListOutcome::Destroyed | ListOutcome::Stopped
    )
}

/// Translate one OS event. Returns false when the stream must end.
async fn process_event(dir: &Path, event: notify::Event, sink: &EventSink) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    ) {
        return true;
    }

    for path in &event.paths {
        if path == dir {
            if tokio::fs::metadata(dir).await.is_err() {
                sink.send(Event::new(EventOp::Destroy, "")).await;
                return false;
            }
            continue;
        }
        if path.parent() != Some(dir) {
            // Sibling of the directory, seen through the parent watch.
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if is_hidden_name(&name) {
            continue;
        }
        let Some(event) = resolve_by_stat(path, name).await else {
            continue;
        };
        if !sink.send(event).await {
            return false;
        }
    }
    true
}

/// Decide what happened to a file by looking at it now.
///
/// Renames arrive as pairs of paths whose meaning differs between
/// platforms; the current state of each path is what counts.
async fn resolve_by_stat(path: &Path, name: String) -> Option<Event> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(Event::new(EventOp::Update, name)),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Some(Event::new(EventOp::Delete, name))
        }
        Err(e) => {
            tracing::warn!("cannot stat {}: {e}", path.display());
            Some(Event {
                op: EventOp::Error,
                name,
                err: Some(e),
            })
        }
    }
}
