//! Storage backends ("boxes") and the contract they share.
//!
//! A box stores zettel and hands out metadata and content by identifier.
//! What a box may do is fixed when it is built ([`Capabilities`]); the
//! manager consults that instead of probing the box at runtime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BoxError, Result};
use crate::id::Zid;
use crate::meta::Meta;
use crate::watch::NotifierKind;
use crate::zettel::Zettel;

pub mod dirbox;
pub mod membox;
pub mod registry;

pub use dirbox::DirBox;
pub use membox::MemBox;
pub use registry::{BoxFactory, BoxRegistry};

/// Which mutating operations a box supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
}

impl Capabilities {
    pub const READ_ONLY: Capabilities = Capabilities {
        can_create: false,
        can_update: false,
        can_delete: false,
    };

    pub const FULL: Capabilities = Capabilities {
        can_create: true,
        can_update: true,
        can_delete: true,
    };

    pub fn is_read_only(self) -> bool {
        !(self.can_create || self.can_update || self.can_delete)
    }
}

/// Lifecycle state of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxState {
    #[default]
    Created,
    Starting,
    Working,
    /// The backing store is unavailable; known entries are kept.
    Missing,
    /// Stopped for good.
    Stopping,
}

impl BoxState {
    /// True while the box accepts requests.
    pub fn is_running(self) -> bool {
        matches!(self, BoxState::Working | BoxState::Missing)
    }
}

impl fmt::Display for BoxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BoxState::Created => "created",
            BoxState::Starting => "starting",
            BoxState::Working => "working",
            BoxState::Missing => "missing",
            BoxState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Why a box reports a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// The zettel was created or changed.
    Zettel,
    Delete,
    /// The box re-read its whole store; the identifier is `Zid::INVALID`.
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateInfo {
    pub box_number: usize,
    pub zid: Zid,
    pub reason: UpdateReason,
}

/// Callback invoked after every durable change of a box.
pub type Observer = Arc<dyn Fn(UpdateInfo) + Send + Sync>;

/// Early filter for enumeration: only identifiers passing it are read.
pub type Retrieve<'a> = dyn Fn(Zid) -> bool + Send + Sync + 'a;

/// Accept every identifier.
pub fn retrieve_all(_: Zid) -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxStats {
    pub read_only: bool,
    pub zettel_count: usize,
}

/// Settings used when a box URI does not say otherwise.
#[derive(Debug, Clone)]
pub struct BoxDefaults {
    pub dir_type: NotifierKind,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
    pub worker: u32,
    pub read_only: bool,
}

impl Default for BoxDefaults {
    fn default() -> Self {
        Self {
            dir_type: NotifierKind::default(),
            poll_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(5),
            worker: dirbox::worker::DEFAULT_WORKERS,
            read_only: false,
        }
    }
}

/// What a factory needs besides the URI.
#[derive(Clone, Default)]
pub struct BoxContext {
    /// Position of the box in the manager, starting at 1.
    pub number: usize,
    pub observer: Option<Observer>,
    pub defaults: BoxDefaults,
}

impl BoxContext {
    pub fn notify(&self, zid: Zid, reason: UpdateReason) {
        if let Some(observer) = &self.observer {
            observer(UpdateInfo {
                box_number: self.number,
                zid,
                reason,
            });
        }
    }
}

/// The contract every box implements.
///
/// Mutating operations default to a read-only error; a box overrides those
/// its [`Capabilities`] announce.
#[async_trait]
pub trait ManagedBox: Send + Sync {
    /// Where the box keeps its data, as a URI.
    fn location(&self) -> String;

    fn capabilities(&self) -> Capabilities;

    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    fn state(&self) -> BoxState;

    async fn get_zettel(&self, zid: Zid) -> Result<Zettel>;

    async fn get_meta(&self, zid: Zid) -> Result<Meta>;

    async fn has_zettel(&self, zid: Zid) -> bool;

    /// Call `handle` for every stored identifier accepted by `retrieve`.
    async fn apply_zid(
        &self,
        handle: &mut (dyn FnMut(Zid) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()>;

    /// Call `handle` with the metadata of every zettel accepted by `retrieve`.
    async fn apply_meta(
        &self,
        handle: &mut (dyn FnMut(Meta) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()>;

    async fn create_zettel(&self, zettel: Zettel) -> Result<Zid> {
        let _ = zettel;
        Err(BoxError::ReadOnly(self.location()))
    }

    async fn update_zettel(&self, zettel: Zettel) -> Result<()> {
        let _ = zettel;
        Err(BoxError::ReadOnly(self.location()))
    }

    async fn delete_zettel(&self, zid: Zid) -> Result<()> {
        let _ = zid;
        Err(BoxError::ReadOnly(self.location()))
    }

    fn read_stats(&self) -> BoxStats;

    /// Re-read the backing store.
    fn refresh(&self) {}
}
