//! Directory service: the table of directory entries of one directory box.
//!
//! A single task consumes the notifier's events and is the only writer of
//! entries discovered on disk. The box itself registers and removes the
//! entries of zettel it writes. Readers take a shared lock.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::entry::DirEntry;
use crate::boxes::{BoxContext, BoxState, Retrieve, UpdateReason};
use crate::error::{BoxError, Result};
use crate::id::{Zid, parse_leading_zid};
use crate::watch::{Event, EventOp, NotifierKind, new_notifier};

/// How the service watches its directory.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub kind: NotifierKind,
    pub poll_interval: Duration,
    /// Delay before looking again for a vanished directory.
    pub retry_interval: Duration,
}

type Entries = HashMap<Zid, DirEntry>;

#[derive(Default)]
struct EntryTable {
    entries: Entries,
    /// Identifiers handed out for files whose name carries none.
    minted_names: HashMap<String, Zid>,
    /// Identifiers issued for zettel not yet written.
    reserved: HashSet<Zid>,
    /// Entries the box wrote (`Some`) or deleted (`None`) that no listing
    /// has shown yet. A listing may be read from disk before such a change
    /// and applied after it.
    journal: HashMap<Zid, Option<DirEntry>>,
    last: Zid,
}

impl EntryTable {
    /// Issue an identifier unused by this table and by `pending`.
    fn mint(&mut self, pending: Option<&Entries>) -> Zid {
        let mut zid = Zid::now().max(self.last.next());
        while self.entries.contains_key(&zid)
            || self.reserved.contains(&zid)
            || pending.is_some_and(|p| p.contains_key(&zid))
        {
            zid = zid.next();
        }
        self.last = zid;
        zid
    }

    /// Lay the box's own changes over a fresh listing. A change stays in
    /// the journal until a listing agrees with it.
    fn replay_journal(&mut self, listed: &mut Entries) {
        self.journal.retain(|zid, change| match change {
            Some(entry) => {
                if listed.contains_key(zid) {
                    return false;
                }
                listed.insert(*zid, entry.clone());
                true
            }
            None => listed.remove(zid).is_some(),
        });
    }

    fn zid_for_name(&mut self, name: &str, pending: Option<&Entries>) -> Zid {
        if let Some(zid) = parse_leading_zid(name) {
            return zid;
        }
        if let Some(zid) = self.minted_names.get(name) {
            return *zid;
        }
        let zid = self.mint(pending);
        tracing::debug!("file {name} carries no identifier, using {zid}");
        self.minted_names.insert(name.to_string(), zid);
        zid
    }
}

struct Shared {
    dir: PathBuf,
    ctx: BoxContext,
    state: watch::Sender<BoxState>,
    table: RwLock<EntryTable>,
}

impl Shared {
    fn state(&self) -> BoxState {
        *self.state.borrow()
    }

    fn set_state(&self, state: BoxState) {
        let old = self.state.send_replace(state);
        if old != state {
            tracing::debug!("directory {} is {state} (was {old})", self.dir.display());
        }
    }

    fn add_file(&self, name: &str) -> Zid {
        let mut table = self.table.write();
        let zid = table.zid_for_name(name, None);
        table
            .entries
            .entry(zid)
            .or_insert_with(|| DirEntry::new(zid))
            .add_file(name);
        table.reserved.remove(&zid);
        if matches!(table.journal.get(&zid), Some(Some(_))) {
            table.journal.remove(&zid);
        }
        zid
    }

    /// Forget a file. Returns the identifier and whether its entry is gone.
    fn remove_file(&self, name: &str) -> Option<(Zid, bool)> {
        let mut table = self.table.write();
        let zid = parse_leading_zid(name).or_else(|| table.minted_names.get(name).copied())?;
        let entry = table.entries.get_mut(&zid)?;
        if !entry.remove_file(name) {
            return None;
        }
        let gone = entry.is_empty();
        if gone {
            table.entries.remove(&zid);
            table.journal.remove(&zid);
        }
        table.minted_names.remove(name);
        Some((zid, gone))
    }

    /// Apply one notifier event. Returns false once the directory is gone.
    fn handle_event(&self, event: Event, pending: &mut Option<Entries>) -> bool {
        match event.op {
            EventOp::ListStart => *pending = Some(Entries::new()),
            EventOp::List => match pending.as_mut() {
                Some(entries) => {
                    let zid = self.table.write().zid_for_name(&event.name, Some(&*entries));
                    entries
                        .entry(zid)
                        .or_insert_with(|| DirEntry::new(zid))
                        .add_file(&event.name);
                }
                None => {
                    self.add_file(&event.name);
                }
            },
            EventOp::ListEnd => {
                let mut entries = pending.take().unwrap_or_default();
                let count = {
                    let mut table = self.table.write();
                    for zid in entries.keys() {
                        table.reserved.remove(zid);
                    }
                    table.replay_journal(&mut entries);
                    table.entries = entries;
                    table.entries.len()
                };
                self.set_state(BoxState::Working);
                tracing::debug!("listed {count} zettel in {}", self.dir.display());
                self.ctx.notify(Zid::INVALID, UpdateReason::Reload);
            }
            EventOp::Update => {
                let zid = self.add_file(&event.name);
                self.ctx.notify(zid, UpdateReason::Zettel);
            }
            EventOp::Delete => {
                if let Some((zid, gone)) = self.remove_file(&event.name) {
                    let reason = if gone {
                        UpdateReason::Delete
                    } else {
                        UpdateReason::Zettel
                    };
                    self.ctx.notify(zid, reason);
                }
            }
            EventOp::Destroy => return false,
            EventOp::Error => {
                let err = event.err.map(|e| e.to_string()).unwrap_or_default();
                tracing::warn!(
                    "notifier error in {} (file '{}'): {err}",
                    self.dir.display(),
                    event.name
                );
            }
        }
        true
    }
}

/// Directory entry table plus the task keeping it in sync with the disk.
pub struct DirService {
    shared: Arc<Shared>,
    settings: WatchSettings,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DirService {
    pub fn new(dir: &Path, settings: WatchSettings, ctx: BoxContext) -> Self {
        let (state, _) = watch::channel(BoxState::Created);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                dir: dir.to_path_buf(),
                ctx,
                state,
                table: RwLock::new(EntryTable::default()),
            }),
            settings,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    pub fn state(&self) -> BoxState {
        self.shared.state()
    }

    /// Start watching and wait for the first complete listing.
    ///
    /// A missing directory does not fail the start: the service reports
    /// `Missing` and picks the directory up once it appears.
    pub async fn start(&self) -> Result<()> {
        let Some(refresh_rx) = self.refresh_rx.lock().take() else {
            return Err(BoxError::Conflict(format!(
                "directory service for {} already started",
                self.shared.dir.display()
            )));
        };
        self.shared.set_state(BoxState::Starting);
        let mut state_rx = self.shared.state.subscribe();

        let task = tokio::spawn(run_service(
            Arc::clone(&self.shared),
            self.settings.clone(),
            refresh_rx,
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(task);

        let settled = tokio::select! {
            _ = self.cancel.cancelled() => None,
            res = state_rx.wait_for(|s| !matches!(s, BoxState::Created | BoxState::Starting)) => {
                res.ok().map(|s| *s)
            }
        };
        match settled {
            Some(BoxState::Working) => Ok(()),
            Some(BoxState::Missing) => {
                tracing::warn!(
                    "directory {} does not exist yet, waiting for it",
                    self.shared.dir.display()
                );
                Ok(())
            }
            _ => Err(BoxError::Stopped(self.shared.dir.display().to_string())),
        }
    }

    /// Stop watching and discard all entries.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(
                "directory service for {} ended abnormally: {e}",
                self.shared.dir.display()
            );
        }
        self.shared.set_state(BoxState::Stopping);
        *self.shared.table.write() = EntryTable::default();
    }

    /// Ask for a complete re-listing of the directory.
    pub fn refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state().is_running() {
            Ok(())
        } else {
            Err(BoxError::Stopped(self.shared.dir.display().to_string()))
        }
    }

    pub fn num_dir_entries(&self) -> usize {
        self.shared.table.read().entries.len()
    }

    pub fn get_dir_entry(&self, zid: Zid) -> Option<DirEntry> {
        self.shared.table.read().entries.get(&zid).cloned()
    }

    /// Entries whose identifier passes `retrieve`, ordered by identifier.
    pub fn get_dir_entries(&self, retrieve: &Retrieve<'_>) -> Vec<DirEntry> {
        let mut entries: Vec<DirEntry> = self
            .shared
            .table
            .read()
            .entries
            .values()
            .filter(|e| retrieve(e.zid))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.zid);
        entries
    }

    /// Issue a fresh identifier and reserve it until it is registered or
    /// discarded.
    pub fn set_new_dir_entry(&self) -> Result<Zid> {
        self.ensure_running()?;
        let mut table = self.shared.table.write();
        let zid = table.mint(None);
        table.reserved.insert(zid);
        Ok(zid)
    }

    /// Give back an identifier from `set_new_dir_entry` that was not used.
    pub fn discard_new_zid(&self, zid: Zid) {
        self.shared.table.write().reserved.remove(&zid);
    }

    /// Register or replace the entry for `entry.zid`.
    pub fn update_dir_entry(&self, entry: DirEntry) -> Result<()> {
        self.ensure_running()?;
        let mut table = self.shared.table.write();
        table.reserved.remove(&entry.zid);
        table.journal.insert(entry.zid, Some(entry.clone()));
        table.entries.insert(entry.zid, entry);
        Ok(())
    }

    pub fn delete_dir_entry(&self, zid: Zid) -> Result<()> {
        self.ensure_running()?;
        let mut table = self.shared.table.write();
        table.journal.insert(zid, None);
        if table.entries.remove(&zid).is_none() {
            return Err(BoxError::NotFound(zid));
        }
        table.minted_names.retain(|_, z| *z != zid);
        Ok(())
    }
}

impl Drop for DirService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Consume notifier events until cancelled. A vanished directory is
/// looked for again every `retry_interval`.
async fn run_service(
    shared: Arc<Shared>,
    settings: WatchSettings,
    mut refresh_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        let mut notifier = new_notifier(settings.kind, &shared.dir, settings.poll_interval);
        let mut pending = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    notifier.close();
                    return;
                }
                Some(()) = refresh_rx.recv() => notifier.refresh(),
                event = notifier.events().recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if !shared.handle_event(event, &mut pending) {
                        break;
                    }
                }
            }
        }
        notifier.close();

        if shared.state() != BoxState::Missing {
            tracing::warn!(
                "directory {} vanished, keeping {} known entries",
                shared.dir.display(),
                shared.table.read().entries.len()
            );
            shared.set_state(BoxState::Missing);
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(settings.retry_interval) => {}
        }
    }
}
