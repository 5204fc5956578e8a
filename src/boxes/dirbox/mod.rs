//! Directory box: zettel stored as files in one directory.
//!
//! The [`DirService`] knows which files belong to which identifier; the
//! [`WorkerPool`] does the actual file I/O. A box URI looks like
//! `dir:///path/to/zettel?type=simple&worker=13&readonly`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::boxes::{
    BoxContext, BoxState, BoxStats, Capabilities, ManagedBox, Retrieve, UpdateReason,
};
use crate::error::{BoxError, Result};
use crate::id::Zid;
use crate::meta::Meta;
use crate::watch::NotifierKind;
use crate::zettel::Zettel;

pub mod entry;
pub mod files;
pub mod service;
pub mod worker;

pub use entry::DirEntry;
pub use service::{DirService, WatchSettings};
pub use worker::WorkerPool;

use worker::{MAX_WORKERS, MIN_WORKERS, make_prime};

pub struct DirBox {
    location: String,
    dir: PathBuf,
    read_only: bool,
    worker_count: u32,
    ctx: BoxContext,
    service: DirService,
    workers: RwLock<Option<Arc<WorkerPool>>>,
    shutdown: CancellationToken,
}

impl DirBox {
    /// Build a directory box from its URI.
    pub fn from_url(url: &Url, ctx: BoxContext) -> Result<Self> {
        let dir = dir_from_url(url)?;
        let mut read_only = ctx.defaults.read_only;
        let mut kind = ctx.defaults.dir_type;
        let mut worker_count = ctx.defaults.worker;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "readonly" => read_only = parse_flag(&value),
                "type" => match value.parse::<NotifierKind>() {
                    Ok(k) => kind = k,
                    Err(e) => tracing::warn!("{url}: {e}, using '{kind}'"),
                },
                "worker" => match value.parse::<u32>() {
                    Ok(n) => worker_count = n,
                    Err(_) => tracing::warn!(
                        "{url}: invalid worker count '{value}', using {worker_count}"
                    ),
                },
                other => tracing::debug!("{url}: ignoring unknown option '{other}'"),
            }
        }
        let worker_count = make_prime(worker_count.clamp(MIN_WORKERS, MAX_WORKERS));

        let settings = WatchSettings {
            kind,
            poll_interval: ctx.defaults.poll_interval,
            retry_interval: ctx.defaults.retry_interval,
        };
        let service = DirService::new(&dir, settings, ctx.clone());
        Ok(Self {
            location: url.to_string(),
            dir,
            read_only,
            worker_count,
            ctx,
            service,
            workers: RwLock::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Number of file workers, always prime.
    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    pub fn num_dir_entries(&self) -> usize {
        self.service.num_dir_entries()
    }

    pub fn get_dir_entry(&self, zid: Zid) -> Option<DirEntry> {
        self.service.get_dir_entry(zid)
    }

    fn pool(&self) -> Result<Arc<WorkerPool>> {
        self.workers
            .read()
            .clone()
            .ok_or_else(|| BoxError::Stopped(self.location.clone()))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(BoxError::ReadOnly(self.location.clone()));
        }
        Ok(())
    }

    fn entry(&self, zid: Zid) -> Result<DirEntry> {
        self.service
            .get_dir_entry(zid)
            .ok_or(BoxError::NotFound(zid))
    }
}

#[async_trait]
impl ManagedBox for DirBox {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::READ_ONLY
        } else {
            Capabilities::FULL
        }
    }

    async fn start(&self) -> Result<()> {
        let pool = Arc::new(WorkerPool::start(
            &self.dir,
            self.worker_count,
            self.shutdown.clone(),
        ));
        *self.workers.write() = Some(pool);
        if let Err(e) = self.service.start().await {
            if let Some(pool) = self.workers.write().take() {
                pool.shutdown();
            }
            return Err(e);
        }
        tracing::info!(
            "started directory box {} ({} entries, {} workers)",
            self.location,
            self.service.num_dir_entries(),
            self.worker_count
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(pool) = self.workers.write().take() {
            pool.shutdown();
        }
        self.shutdown.cancel();
        self.service.stop().await;
        tracing::debug!("stopped directory box {}", self.location);
    }

    fn state(&self) -> BoxState {
        self.service.state()
    }

    async fn get_zettel(&self, zid: Zid) -> Result<Zettel> {
        let entry = self.entry(zid)?;
        self.pool()?.get_zettel(entry).await.inspect_err(|e| {
            tracing::warn!("{}: cannot read zettel {zid}: {e}", self.location);
        })
    }

    async fn get_meta(&self, zid: Zid) -> Result<Meta> {
        let entry = self.entry(zid)?;
        self.pool()?.get_meta(entry).await.inspect_err(|e| {
            tracing::warn!("{}: cannot read metadata of {zid}: {e}", self.location);
        })
    }

    async fn has_zettel(&self, zid: Zid) -> bool {
        self.service.get_dir_entry(zid).is_some()
    }

    async fn apply_zid(
        &self,
        handle: &mut (dyn FnMut(Zid) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()> {
        for entry in self.service.get_dir_entries(retrieve) {
            handle(entry.zid);
        }
        Ok(())
    }

    async fn apply_meta(
        &self,
        handle: &mut (dyn FnMut(Meta) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()> {
        let pool = self.pool()?;
        let entries = self.service.get_dir_entries(retrieve);
        let mut metas = futures::stream::iter(entries)
            .map(|entry| {
                let pool = Arc::clone(&pool);
                async move { pool.get_meta(entry).await }
            })
            .buffered(pool.len().max(1));

        while let Some(res) = metas.next().await {
            match res {
                Ok(meta) => handle(meta),
                // Removed between listing and reading.
                Err(BoxError::Storage { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("{}: metadata scan failed: {e}", self.location);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn create_zettel(&self, zettel: Zettel) -> Result<Zid> {
        self.ensure_writable()?;
        let pool = self.pool()?;
        let zid = self.service.set_new_dir_entry()?;

        let Zettel { mut meta, content } = zettel;
        meta.zid = zid;
        let zettel = Zettel::new(meta, content);
        let (entry, obsolete) = DirEntry::new(zid).for_write(&zettel.meta, zettel.is_binary());

        // The entry is registered only after its files exist.
        if let Err(e) = pool.set_zettel(entry.clone(), obsolete, zettel).await {
            self.service.discard_new_zid(zid);
            tracing::warn!("{}: cannot create zettel {zid}: {e}", self.location);
            return Err(e);
        }
        self.service.update_dir_entry(entry)?;
        self.ctx.notify(zid, UpdateReason::Zettel);
        Ok(zid)
    }

    async fn update_zettel(&self, zettel: Zettel) -> Result<()> {
        self.ensure_writable()?;
        let zid = zettel.zid();
        if !zid.is_valid() {
            return Err(BoxError::InvalidId(zid.to_string()));
        }
        let pool = self.pool()?;

        // A zettel new to this box gets a fresh entry.
        let current = self
            .service
            .get_dir_entry(zid)
            .unwrap_or_else(|| DirEntry::new(zid));
        let (entry, obsolete) = current.for_write(&zettel.meta, zettel.is_binary());
        pool.set_zettel(entry.clone(), obsolete, zettel)
            .await
            .inspect_err(|e| {
                tracing::warn!("{}: cannot update zettel {zid}: {e}", self.location);
            })?;
        self.service.update_dir_entry(entry)?;
        self.ctx.notify(zid, UpdateReason::Zettel);
        Ok(())
    }

    async fn delete_zettel(&self, zid: Zid) -> Result<()> {
        self.ensure_writable()?;
        let pool = self.pool()?;
        let entry = self.entry(zid)?;
        // The entry goes only once its files are gone.
        pool.delete(entry).await.inspect_err(|e| {
            tracing::warn!("{}: cannot delete files of {zid}: {e}", self.location);
        })?;
        match self.service.delete_dir_entry(zid) {
            // The notifier saw the files vanish first.
            Ok(()) | Err(BoxError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.ctx.notify(zid, UpdateReason::Delete);
        Ok(())
    }

    fn read_stats(&self) -> BoxStats {
        BoxStats {
            read_only: self.read_only,
            zettel_count: self.service.num_dir_entries(),
        }
    }

    fn refresh(&self) {
        self.service.refresh();
    }
}

/// Directory named by a box URI: `dir:///abs/path` or `dir:relative/path`.
fn dir_from_url(url: &Url) -> Result<PathBuf> {
    let invalid = || BoxError::InvalidUri(url.to_string());
    if !matches!(url.host_str(), None | Some("") | Some("localhost")) {
        return Err(invalid());
    }
    let path = urlencoding::decode(url.path()).map_err(|_| invalid())?;
    if path.is_empty() {
        return Err(invalid());
    }
    Ok(PathBuf::from(path.as_ref()))
}

/// A flag given without value is set.
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirbox(uri: &str) -> DirBox {
        DirBox::from_url(&Url::parse(uri).unwrap(), BoxContext::default()).unwrap()
    }

    #[test]
    fn test_uri_options() {
        let b = dirbox("dir:///tmp/zettel?readonly&type=simple&worker=4");
        assert_eq!(b.dir(), std::path::Path::new("/tmp/zettel"));
        assert!(b.capabilities().is_read_only());
        assert_eq!(b.worker_count(), 5);
    }

    #[test]
    fn test_worker_count_is_clamped() {
        assert_eq!(dirbox("dir:///tmp/z?worker=0").worker_count(), 2);
        assert_eq!(dirbox("dir:///tmp/z?worker=100000").worker_count(), 1499);
        assert_eq!(dirbox("dir:///tmp/z?worker=many").worker_count(), 7);
    }

    #[test]
    fn test_invalid_type_falls_back_to_default() {
        let b = dirbox("dir:///tmp/z?type=bogus");
        assert_eq!(b.capabilities(), Capabilities::FULL);
    }

    #[test]
    fn test_relative_path() {
        let b = dirbox("dir:zettel");
        assert_eq!(b.dir(), std::path::Path::new("zettel"));
    }

    #[test]
    fn test_path_is_decoded_and_host_rejected() {
        let b = dirbox("dir:///tmp/my%20notes");
        assert_eq!(b.dir(), std::path::Path::new("/tmp/my notes"));
        let res = DirBox::from_url(
            &Url::parse("dir://server/share").unwrap(),
            BoxContext::default(),
        );
        assert!(matches!(res, Err(BoxError::InvalidUri(_))));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(""));
        assert!(parse_flag("true"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }
}
