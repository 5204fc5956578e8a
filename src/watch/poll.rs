//! Polling notifier.
//!
//! Lists the directory every `interval` and diffs against the previous
//! listing. Used when OS notifications are disabled or unavailable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    CHANNEL_CAPACITY, Event, EventOp, EventSink, ListOutcome, Listing, Notifier, emit_listing,
    read_listing,
};

pub struct PollNotifier {
    events: mpsc::Receiver<Event>,
    refresh_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl PollNotifier {
    pub fn start(dir: &Path, interval: Duration) -> Self {
        let (tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        tokio::spawn(run_poll_loop(dir.to_path_buf(), interval, refresh_rx, sink));
        Self {
            events,
            refresh_tx,
            cancel,
        }
    }
}

impl Notifier for PollNotifier {
    fn events(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.events
    }

    fn refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PollNotifier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_poll_loop(
    dir: PathBuf,
    interval: Duration,
    mut refresh_rx: mpsc::Receiver<()>,
    sink: EventSink,
) {
    let mut known = match emit_listing(&dir, &sink).await {
        ListOutcome::Done(listing) => listing,
        ListOutcome::Failed => Listing::new(),
        ListOutcome::Destroyed | ListOutcome::Stopped => return,
    };

    loop {
        tokio::select! {
            biased;
            _ = sink.cancel_token().cancelled() => return,
            Some(()) = refresh_rx.recv() => {
                match emit_listing(&dir, &sink).await {
                    ListOutcome::Done(listing) => known = listing,
                    ListOutcome::Failed => {}
                    ListOutcome::Destroyed | ListOutcome::Stopped => return,
                }
            }
            _ = tokio::time::sleep(interval) => {
                match read_listing(&dir).await {
                    Ok(current) => {
                        for event in diff_listings(&known, &current) {
                            if !sink.send(event).await {
                                return;
                            }
                        }
                        known = current;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        sink.send(Event::new(EventOp::Destroy, "")).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("failed to poll {}: {e}", dir.display());
                        if !sink.send(Event::error(e)).await {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Events turning `old` into `new`: updates for new or changed files,
/// deletes for vanished ones.
fn diff_listings(old: &Listing, new: &Listing) -> Vec<Event> {
    let mut events = Vec::new();
    for (name, stamp) in new {
        if old.get(name) != Some(stamp) {
            events.push(Event::new(EventOp::Update, name.clone()));
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            events.push(Event::new(EventOp::Delete, name.clone()));
        }
    }
    events
}
