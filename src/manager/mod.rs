//! Box manager: several boxes behind one interface.
//!
//! Boxes are numbered from 1 in the order given. Box 1 receives every new
//! or changed zettel; reads walk the boxes in order and the first hit wins,
//! so a zettel in a lower-numbered box shadows copies further down.
//!
//! The search index is kept current by a background task fed by the box
//! observers. Metadata handed out by the manager carries the computed
//! properties (`box-number`, `forward`, `backward`, `dead`); the manager
//! strips them again before anything is written.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::boxes::{
    BoxContext, BoxDefaults, BoxRegistry, BoxState, BoxStats, ManagedBox, Observer, UpdateInfo,
    UpdateReason, retrieve_all,
};
use crate::error::{BoxError, Result};
use crate::id::{Zid, ZidSet};
use crate::index::{IndexStats, Indexer};
use crate::meta::Meta;
use crate::meta::keys::KEY_BOX_NUMBER;
use crate::query::{Compiled, Query, Searcher, compile};
use crate::zettel::Zettel;

/// Work for the index task.
enum IndexTask {
    Update(UpdateInfo),
    /// Answered once everything queued before it is processed.
    Sync(oneshot::Sender<()>),
}

/// Statistics over all boxes and the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// True if box 1 cannot store new zettel.
    pub read_only: bool,
    pub boxes: Vec<BoxStats>,
    /// Zettel over all boxes, shadowed copies included.
    pub zettel_count: usize,
    pub index: IndexStats,
}

/// State shared with the index task.
struct Inner {
    boxes: RwLock<Vec<Arc<dyn ManagedBox>>>,
    indexer: Arc<dyn Indexer>,
    observers: RwLock<Vec<Observer>>,
}

impl Inner {
    fn boxes(&self) -> Vec<Arc<dyn ManagedBox>> {
        self.boxes.read().clone()
    }

    /// First stored version of `zid`, without computed properties.
    async fn stored_zettel(&self, zid: Zid) -> Result<(usize, Zettel)> {
        for (i, b) in self.boxes().iter().enumerate() {
            match b.get_zettel(zid).await {
                Ok(zettel) => return Ok((i + 1, zettel)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BoxError::NotFound(zid))
    }

    fn enrich(&self, meta: &mut Meta, box_number: usize) {
        meta.set(KEY_BOX_NUMBER, &box_number.to_string());
        self.indexer.enrich(meta);
    }

    async fn reindex_zettel(&self, zid: Zid) {
        match self.stored_zettel(zid).await {
            Ok((_, zettel)) => self.indexer.update_zettel(&zettel),
            Err(e) if e.is_not_found() => self.indexer.delete_zettel(zid),
            Err(e) => tracing::warn!("cannot index zettel {zid}: {e}"),
        }
    }

    async fn reindex(&self) -> Result<usize> {
        let mut zids = ZidSet::new();
        for b in self.boxes() {
            b.apply_zid(
                &mut |zid| {
                    zids.insert(zid);
                },
                &retrieve_all,
            )
            .await?;
        }
        for zid in &zids {
            self.reindex_zettel(*zid).await;
        }
        for stale in self.indexer.indexed().difference(&zids) {
            self.indexer.delete_zettel(*stale);
        }
        tracing::debug!("reindexed {} zettel", zids.len());
        Ok(zids.len())
    }

    async fn apply_update(&self, info: UpdateInfo) {
        match info.reason {
            UpdateReason::Reload => {
                if let Err(e) = self.reindex().await {
                    tracing::warn!("reindex after reload of box {} failed: {e}", info.box_number);
                }
            }
            UpdateReason::Zettel | UpdateReason::Delete => self.reindex_zettel(info.zid).await,
        }
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer(info);
        }
    }
}

async fn run_index_task(
    inner: Arc<Inner>,
    mut tasks: mpsc::UnboundedReceiver<IndexTask>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = tasks.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        match task {
            IndexTask::Update(info) => inner.apply_update(info).await,
            IndexTask::Sync(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("index task stopped");
}

pub struct Manager {
    inner: Arc<Inner>,
    state: RwLock<BoxState>,
    tasks: mpsc::UnboundedSender<IndexTask>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<IndexTask>>>,
    index_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Manager {
    /// Build one box per URI, numbered in the given order.
    pub fn connect(
        uris: &[String],
        registry: &BoxRegistry,
        defaults: BoxDefaults,
        indexer: Arc<dyn Indexer>,
    ) -> Result<Self> {
        if uris.is_empty() {
            return Err(BoxError::Config("no boxes configured".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let observer: Observer = Arc::new(move |info: UpdateInfo| {
            let _ = sender.send(IndexTask::Update(info));
        });

        let mut boxes = Vec::with_capacity(uris.len());
        for (i, uri) in uris.iter().enumerate() {
            let ctx = BoxContext {
                number: i + 1,
                observer: Some(Arc::clone(&observer)),
                defaults: defaults.clone(),
            };
            boxes.push(registry.connect(uri, ctx)?);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                boxes: RwLock::new(boxes),
                indexer,
                observers: RwLock::new(Vec::new()),
            }),
            state: RwLock::new(BoxState::Created),
            tasks: tx,
            receiver: Mutex::new(Some(rx)),
            index_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn location(&self) -> Vec<String> {
        self.inner.boxes().iter().map(|b| b.location()).collect()
    }

    pub fn state(&self) -> BoxState {
        *self.state.read()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state().is_running() {
            Ok(())
        } else {
            Err(BoxError::Stopped("box manager".to_string()))
        }
    }

    /// Start all boxes, then build the index.
    ///
    /// If a box fails to start, the boxes started before it are stopped
    /// again and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let receiver = {
            let mut state = self.state.write();
            if *state != BoxState::Created {
                return Err(BoxError::Conflict(format!("box manager is {}", *state)));
            }
            let Some(receiver) = self.receiver.lock().take() else {
                return Err(BoxError::Conflict("box manager cannot be restarted".into()));
            };
            *state = BoxState::Starting;
            receiver
        };

        let boxes = self.inner.boxes();
        for (i, b) in boxes.iter().enumerate() {
            if let Err(e) = b.start().await {
                tracing::warn!("box {} ({}) failed to start: {e}", i + 1, b.location());
                for started in boxes[..i].iter().rev() {
                    started.stop().await;
                }
                *self.state.write() = BoxState::Stopping;
                return Err(e);
            }
        }

        let handle = tokio::spawn(run_index_task(
            Arc::clone(&self.inner),
            receiver,
            self.shutdown.clone(),
        ));
        *self.index_task.lock() = Some(handle);
        *self.state.write() = BoxState::Working;

        let count = self.inner.reindex().await?;
        tracing::info!("started {} boxes, {count} zettel indexed", boxes.len());
        Ok(())
    }

    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == BoxState::Stopping {
                return;
            }
            *state = BoxState::Stopping;
        }
        self.shutdown.cancel();
        let handle = self.index_task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("index task ended abnormally: {e}");
        }
        for b in self.inner.boxes().iter().rev() {
            b.stop().await;
        }
        tracing::info!("box manager stopped");
    }

    /// Call `observer` after each change has reached the index.
    pub fn register_observer(&self, observer: Observer) {
        self.inner.observers.write().push(observer);
    }

    /// Store a new zettel in box 1.
    pub async fn create_zettel(&self, mut zettel: Zettel) -> Result<Zid> {
        self.ensure_running()?;
        let target = self.first_box()?;
        if !target.capabilities().can_create {
            return Err(BoxError::ReadOnly(target.location()));
        }
        zettel.meta.clean_properties();
        let zid = target.create_zettel(zettel).await.inspect_err(|e| {
            tracing::warn!("create zettel in {} failed: {e}", target.location());
        })?;
        tracing::debug!("created zettel {zid}");
        Ok(zid)
    }

    pub async fn get_zettel(&self, zid: Zid) -> Result<Zettel> {
        self.ensure_running()?;
        let (number, mut zettel) = self.inner.stored_zettel(zid).await?;
        self.inner.enrich(&mut zettel.meta, number);
        Ok(zettel)
    }

    /// Every stored version of `zid`, one per box holding it.
    pub async fn get_all_zettel(&self, zid: Zid) -> Result<Vec<Zettel>> {
        self.ensure_running()?;
        let mut found = Vec::new();
        for (i, b) in self.inner.boxes().iter().enumerate() {
            match b.get_zettel(zid).await {
                Ok(mut zettel) => {
                    self.inner.enrich(&mut zettel.meta, i + 1);
                    found.push(zettel);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    pub async fn get_meta(&self, zid: Zid) -> Result<Meta> {
        self.ensure_running()?;
        for (i, b) in self.inner.boxes().iter().enumerate() {
            match b.get_meta(zid).await {
                Ok(mut meta) => {
                    self.inner.enrich(&mut meta, i + 1);
                    return Ok(meta);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BoxError::NotFound(zid))
    }

    pub async fn has_zettel(&self, zid: Zid) -> bool {
        if self.ensure_running().is_err() {
            return false;
        }
        for b in self.inner.boxes() {
            if b.has_zettel(zid).await {
                return true;
            }
        }
        false
    }

    /// Identifiers of all zettel in all boxes.
    pub async fn fetch_zids(&self) -> Result<ZidSet> {
        self.ensure_running()?;
        let mut zids = ZidSet::new();
        for b in self.inner.boxes() {
            b.apply_zid(
                &mut |zid| {
                    zids.insert(zid);
                },
                &retrieve_all,
            )
            .await?;
        }
        Ok(zids)
    }

    /// Metadata of all zettel matching `query`, newest first.
    pub async fn select_meta(&self, query: &Query) -> Result<Vec<Meta>> {
        self.ensure_running()?;
        let searcher: &dyn Searcher = self.inner.indexer.as_ref();
        let compiled = compile(query, Some(searcher));
        let Some(zids) = compiled.result() else {
            return self.scan_meta(&compiled).await;
        };
        let mut metas = Vec::with_capacity(zids.len());
        for zid in zids.iter().rev() {
            match self.get_meta(*zid).await {
                Ok(meta) => metas.push(meta),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("index lists zettel {zid}, but no box has it");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(metas)
    }

    /// Read metadata from every box and keep what `compiled` matches.
    ///
    /// Terms are tried one after another. A zettel accepted by an earlier
    /// term is not read again; within a term only the first box holding a
    /// zettel decides.
    pub async fn scan_meta(&self, compiled: &Compiled) -> Result<Vec<Meta>> {
        self.ensure_running()?;
        let boxes = self.inner.boxes();
        let mut accepted: BTreeMap<Zid, Meta> = BTreeMap::new();
        for term in compiled.terms() {
            let mut rejected = ZidSet::new();
            for (i, b) in boxes.iter().enumerate() {
                let mut metas = Vec::new();
                {
                    let seen = |zid: Zid| accepted.contains_key(&zid) || rejected.contains(&zid);
                    let retrieve = |zid: Zid| !seen(zid) && term.pre_match(zid);
                    b.apply_meta(&mut |meta| metas.push(meta), &retrieve).await?;
                }
                for mut meta in metas {
                    self.inner.enrich(&mut meta, i + 1);
                    if term.matches(&meta) {
                        accepted.insert(meta.zid, meta);
                    } else {
                        rejected.insert(meta.zid);
                    }
                }
            }
        }
        Ok(accepted.into_values().rev().collect())
    }

    /// Replace a zettel in box 1.
    pub async fn update_zettel(&self, mut zettel: Zettel) -> Result<()> {
        self.ensure_running()?;
        let zid = zettel.zid();
        if !zid.is_valid() {
            return Err(BoxError::InvalidId(zid.to_string()));
        }
        let target = self.first_box()?;
        if !target.capabilities().can_update {
            return Err(BoxError::ReadOnly(target.location()));
        }
        zettel.meta.clean_properties();
        target.update_zettel(zettel).await.inspect_err(|e| {
            tracing::warn!("update zettel {zid} in {} failed: {e}", target.location());
        })
    }

    /// Delete `zid` from the first box that has it and may delete it.
    ///
    /// A copy in a later box becomes visible afterwards.
    pub async fn delete_zettel(&self, zid: Zid) -> Result<()> {
        self.ensure_running()?;
        let mut read_only = None;
        for b in self.inner.boxes() {
            if !b.capabilities().can_delete {
                if read_only.is_none() && b.has_zettel(zid).await {
                    read_only = Some(BoxError::ReadOnly(b.location()));
                }
                continue;
            }
            match b.delete_zettel(zid).await {
                Ok(()) => {
                    tracing::debug!("deleted zettel {zid} from {}", b.location());
                    return Ok(());
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) if e.is_read_only() => {
                    read_only.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!("delete zettel {zid} from {} failed: {e}", b.location());
                    return Err(e);
                }
            }
        }
        Err(read_only.unwrap_or(BoxError::NotFound(zid)))
    }

    /// Ask every box to re-read its backing store.
    pub fn refresh(&self) -> Result<()> {
        self.ensure_running()?;
        for b in self.inner.boxes() {
            b.refresh();
        }
        Ok(())
    }

    /// Rebuild the index from all boxes; returns the number of zettel.
    pub async fn reindex(&self) -> Result<usize> {
        self.ensure_running()?;
        self.inner.reindex().await
    }

    /// Wait until every change reported so far has reached the index.
    pub async fn sync_index(&self) -> Result<()> {
        self.ensure_running()?;
        let (tx, rx) = oneshot::channel();
        self.tasks
            .send(IndexTask::Sync(tx))
            .map_err(|_| BoxError::Stopped("index task".to_string()))?;
        rx.await
            .map_err(|_| BoxError::Stopped("index task".to_string()))
    }

    pub fn read_stats(&self) -> ManagerStats {
        let boxes: Vec<BoxStats> = self.inner.boxes().iter().map(|b| b.read_stats()).collect();
        ManagerStats {
            read_only: boxes.first().is_none_or(|s| s.read_only),
            zettel_count: boxes.iter().map(|s| s.zettel_count).sum(),
            boxes,
            index: self.inner.indexer.stats(),
        }
    }

    fn first_box(&self) -> Result<Arc<dyn ManagedBox>> {
        self.inner
            .boxes
            .read()
            .first()
            .cloned()
            .ok_or_else(|| BoxError::Config("no boxes configured".to_string()))
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::index::MemoryIndex;

    fn uris(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn started(list: &[&str]) -> Manager {
        let manager = Manager::connect(
            &uris(list),
            &BoxRegistry::with_defaults(),
            BoxDefaults::default(),
            Arc::new(MemoryIndex::new()),
        )
        .unwrap();
        manager.start().await.unwrap();
        manager
    }

    fn note(title: &str, content: &str) -> Zettel {
        let mut meta = Meta::new(Zid::INVALID);
        meta.set("title", title);
        Zettel::new(meta, content)
    }

    #[test]
    fn test_connect_requires_boxes() {
        let res = Manager::connect(
            &[],
            &BoxRegistry::with_defaults(),
            BoxDefaults::default(),
            Arc::new(MemoryIndex::new()),
        );
        assert!(matches!(res, Err(BoxError::Config(_))));
    }

    #[tokio::test]
    async fn test_create_strips_properties_and_enriches() {
        let manager = started(&["mem:"]).await;
        let mut zettel = note("One", "body");
        zettel.meta.set("box-number", "9");
        zettel.meta.set("forward", "20230101120000");
        let zid = manager.create_zettel(zettel).await.unwrap();

        manager.sync_index().await.unwrap();
        let meta = manager.get_meta(zid).await.unwrap();
        assert_eq!(meta.get("box-number"), Some("1"));
        assert!(!meta.has("forward"));
        assert_eq!(meta.get("dead"), None);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_requests_need_running_manager() {
        let manager = Manager::connect(
            &uris(&["mem:"]),
            &BoxRegistry::with_defaults(),
            BoxDefaults::default(),
            Arc::new(MemoryIndex::new()),
        )
        .unwrap();
        assert!(matches!(
            manager.create_zettel(note("x", "")).await,
            Err(BoxError::Stopped(_))
        ));
        manager.start().await.unwrap();
        assert!(matches!(manager.start().await, Err(BoxError::Conflict(_))));
        manager.stop().await;
        assert_eq!(manager.state(), BoxState::Stopping);
        assert!(!manager.has_zettel(Zid(20230101120000)).await);
    }

    #[tokio::test]
    async fn test_index_follows_changes() {
        let manager = started(&["mem:"]).await;
        let zid = manager.create_zettel(note("Quince", "jam")).await.unwrap();
        manager.sync_index().await.unwrap();
        let hits = manager.select_meta(&Query::parse("quince").unwrap()).await.unwrap();
        assert_eq!(hits.len(), 1);

        manager.delete_zettel(zid).await.unwrap();
        manager.sync_index().await.unwrap();
        let hits = manager.select_meta(&Query::parse("quince").unwrap()).await.unwrap();
        assert!(hits.is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_registered_observer_runs_after_indexing() {
        let manager = started(&["mem:"]).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.register_observer(Arc::new(move |_: UpdateInfo| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        manager.create_zettel(note("a", "")).await.unwrap();
        manager.sync_index().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stats() {
        let manager = started(&["mem:", "mem:"]).await;
        manager.create_zettel(note("a", "word")).await.unwrap();
        manager.sync_index().await.unwrap();
        let stats = manager.read_stats();
        assert!(!stats.read_only);
        assert_eq!(stats.boxes.len(), 2);
        assert_eq!(stats.zettel_count, 1);
        assert_eq!(stats.index.zettel, 1);
        manager.stop().await;
    }
}
