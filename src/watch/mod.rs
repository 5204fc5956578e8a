//! Directory notifiers.
//!
//! A notifier watches one directory and turns filesystem activity into a
//! small stream of [`Event`]s. Two implementations exist: [`FsNotifier`]
//! is driven by OS change notifications, [`PollNotifier`] re-lists the
//! directory periodically. Consumers cannot tell them apart.
//!
//! Every stream starts with a complete listing (`ListStart`, `List` per
//! file, `ListEnd`). A `refresh` request produces another complete listing.
//! When the directory disappears, a single `Destroy` is sent and the stream
//! ends.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;
use crate::fs::is_hidden_name;

pub mod native;
pub mod poll;

pub use native::FsNotifier;
pub use poll::PollNotifier;

/// Capacity of the event channel between a notifier and its consumer.
pub(crate) const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    /// A complete listing begins.
    ListStart,
    /// One file of a complete listing.
    List,
    /// The complete listing ended.
    ListEnd,
    /// A file was created or changed.
    Update,
    /// A file was removed.
    Delete,
    /// The watched directory vanished. Last event of the stream.
    Destroy,
    /// A transient error; the stream continues.
    Error,
}

#[derive(Debug)]
pub struct Event {
    pub op: EventOp,
    pub name: String,
    pub err: Option<std::io::Error>,
}

impl Event {
    pub fn new(op: EventOp, name: impl Into<String>) -> Self {
        Self {
            op,
            name: name.into(),
            err: None,
        }
    }

    pub fn error(err: std::io::Error) -> Self {
        Self {
            op: EventOp::Error,
            name: String::new(),
            err: Some(err),
        }
    }
}

/// Source of directory events.
pub trait Notifier: Send {
    /// The event stream. Yields `None` after `close` or `Destroy`.
    fn events(&mut self) -> &mut mpsc::Receiver<Event>;

    /// Request one extra complete listing.
    fn refresh(&self);

    /// Stop producing events.
    fn close(&self);
}

/// Which notifier implementation a directory box uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Notify,
    Simple,
}

impl fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifierKind::Notify => write!(f, "notify"),
            NotifierKind::Simple => write!(f, "simple"),
        }
    }
}

impl FromStr for NotifierKind {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notify" => Ok(NotifierKind::Notify),
            "simple" => Ok(NotifierKind::Simple),
            _ => Err(BoxError::Config(format!("invalid notifier type: {s}"))),
        }
    }
}

/// Create and start a notifier for `dir`.
///
/// If OS notifications cannot be set up, falls back to polling.
pub fn new_notifier(kind: NotifierKind, dir: &Path, poll_interval: Duration) -> Box<dyn Notifier> {
    match kind {
        NotifierKind::Simple => Box::new(PollNotifier::start(dir, poll_interval)),
        NotifierKind::Notify => match FsNotifier::start(dir) {
            Ok(notifier) => Box::new(notifier),
            Err(e) => {
                tracing::warn!(
                    "OS notifications unavailable for {}, polling instead: {e}",
                    dir.display()
                );
                Box::new(PollNotifier::start(dir, poll_interval))
            }
        },
    }
}

/// Sending half of an event stream. Every send gives way to cancellation.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Returns false once the stream was closed or the consumer went away.
    pub(crate) async fn send(&self, event: Event) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(event) => res.is_ok(),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Size and modification time of a listed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

pub(crate) type Listing = HashMap<String, FileStamp>;

/// List regular, non-hidden files of `dir`.
pub(crate) async fn read_listing(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden_name(&name) {
            continue;
        }
        // Follows symlinks, so a link to a regular file counts as one.
        let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        listing.insert(
            name,
            FileStamp {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
        );
    }
    Ok(listing)
}

pub(crate) enum ListOutcome {
    /// Listing sent; contains what was listed.
    Done(Listing),
    /// Listing failed with a transient error (already reported).
    Failed,
    /// Directory is gone; `Destroy` was sent.
    Destroyed,
    /// The stream was closed while sending.
    Stopped,
}

/// Send a complete listing of `dir` through `sink`.
pub(crate) async fn emit_listing(dir: &Path, sink: &EventSink) -> ListOutcome {
    let listing = match read_listing(dir).await {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            sink.send(Event::new(EventOp::Destroy, "")).await;
            return ListOutcome::Destroyed;
        }
        Err(e) => {
            tracing::warn!("failed to list {}: {e}", dir.display());
            if !sink.send(Event::error(e)).await {
                return ListOutcome::Stopped;
            }
            return ListOutcome::Failed;
        }
    };

    if !sink.send(Event::new(EventOp::ListStart, "")).await {
        return ListOutcome::Stopped;
    }
    for name in listing.keys() {
        if !sink.send(Event::new(EventOp::List, name.clone())).await {
            return ListOutcome::Stopped;
        }
    }
    if !sink.send(Event::new(EventOp::ListEnd, "")).await {
        return ListOutcome::Stopped;
    }
    ListOutcome::Done(listing)
}
