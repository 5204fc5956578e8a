//! Memory box: zettel kept in process memory, lost on stop.
//!
//! `mem:?max-zettel=100&max-bytes=65536` limits how much it holds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use url::Url;

use crate::boxes::{
    BoxContext, BoxState, BoxStats, Capabilities, ManagedBox, Retrieve, UpdateReason,
};
use crate::error::{BoxError, Result};
use crate::id::Zid;
use crate::meta::Meta;
use crate::zettel::Zettel;

const DEFAULT_MAX_ZETTEL: usize = 127;
const DEFAULT_MAX_BYTES: usize = 65_535;

#[derive(Default)]
struct Store {
    zettel: BTreeMap<Zid, Zettel>,
    bytes: usize,
    last: Zid,
}

impl Store {
    fn mint(&mut self) -> Zid {
        let mut zid = Zid::now().max(self.last.next());
        while self.zettel.contains_key(&zid) {
            zid = zid.next();
        }
        self.last = zid;
        zid
    }
}

pub struct MemBox {
    location: String,
    max_zettel: usize,
    max_bytes: usize,
    ctx: BoxContext,
    state: RwLock<BoxState>,
    store: RwLock<Store>,
}

fn zettel_size(zettel: &Zettel) -> usize {
    zettel.meta.to_text().len() + zettel.content.len()
}

impl MemBox {
    pub fn from_url(url: &Url, ctx: BoxContext) -> Result<Self> {
        let mut max_zettel = DEFAULT_MAX_ZETTEL;
        let mut max_bytes = DEFAULT_MAX_BYTES;
        for (key, value) in url.query_pairs() {
            let limit = || {
                value
                    .parse::<usize>()
                    .map_err(|_| BoxError::InvalidUri(format!("{url}: bad {key} '{value}'")))
            };
            match key.as_ref() {
                "max-zettel" => max_zettel = limit()?,
                "max-bytes" => max_bytes = limit()?,
                other => tracing::debug!("{url}: ignoring unknown option '{other}'"),
            }
        }
        Ok(Self {
            location: url.to_string(),
            max_zettel,
            max_bytes,
            ctx,
            state: RwLock::new(BoxState::Created),
            store: RwLock::new(Store::default()),
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state.read().is_running() {
            Ok(())
        } else {
            Err(BoxError::Stopped(self.location.clone()))
        }
    }
}

#[async_trait]
impl ManagedBox for MemBox {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    async fn start(&self) -> Result<()> {
        *self.store.write() = Store::default();
        *self.state.write() = BoxState::Working;
        tracing::info!(
            "started memory box {} (max {} zettel, {} bytes)",
            self.location,
            self.max_zettel,
            self.max_bytes
        );
        Ok(())
    }

    async fn stop(&self) {
        *self.state.write() = BoxState::Stopping;
        *self.store.write() = Store::default();
    }

    fn state(&self) -> BoxState {
        *self.state.read()
    }

    async fn get_zettel(&self, zid: Zid) -> Result<Zettel> {
        self.ensure_running()?;
        self.store
            .read()
            .zettel
            .get(&zid)
            .cloned()
            .ok_or(BoxError::NotFound(zid))
    }

    async fn get_meta(&self, zid: Zid) -> Result<Meta> {
        self.ensure_running()?;
        self.store
            .read()
            .zettel
            .get(&zid)
            .map(|z| z.meta.clone())
            .ok_or(BoxError::NotFound(zid))
    }

    async fn has_zettel(&self, zid: Zid) -> bool {
        self.store.read().zettel.contains_key(&zid)
    }

    async fn apply_zid(
        &self,
        handle: &mut (dyn FnMut(Zid) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()> {
        self.ensure_running()?;
        let zids: Vec<Zid> = self
            .store
            .read()
            .zettel
            .keys()
            .copied()
            .filter(|z| retrieve(*z))
            .collect();
        zids.into_iter().for_each(handle);
        Ok(())
    }

    async fn apply_meta(
        &self,
        handle: &mut (dyn FnMut(Meta) + Send),
        retrieve: &Retrieve<'_>,
    ) -> Result<()> {
        self.ensure_running()?;
        let metas: Vec<Meta> = self
            .store
            .read()
            .zettel
            .values()
            .filter(|z| retrieve(z.zid()))
            .map(|z| z.meta.clone())
            .collect();
        metas.into_iter().for_each(handle);
        Ok(())
    }

    async fn create_zettel(&self, zettel: Zettel) -> Result<Zid> {
        self.ensure_running()?;
        let zid = {
            let mut store = self.store.write();
            let size = zettel_size(&zettel);
            if store.zettel.len() >= self.max_zettel {
                return Err(BoxError::Capacity(format!(
                    "{} holds at most {} zettel",
                    self.location, self.max_zettel
                )));
            }
            if store.bytes + size > self.max_bytes {
                return Err(BoxError::Capacity(format!(
                    "{} holds at most {} bytes",
                    self.location, self.max_bytes
                )));
            }
            let zid = store.mint();
            let Zettel { mut meta, content } = zettel;
            meta.zid = zid;
            store.bytes += size;
            store.zettel.insert(zid, Zettel::new(meta, content));
            zid
        };
        self.ctx.notify(zid, UpdateReason::Zettel);
        Ok(zid)
    }

    async fn update_zettel(&self, zettel: Zettel) -> Result<()> {
        self.ensure_running()?;
        let zid = zettel.zid();
        if !zid.is_valid() {
            return Err(BoxError::InvalidId(zid.to_string()));
        }
        {
            let mut store = self.store.write();
            let old_size = store.zettel.get(&zid).map_or(0, zettel_size);
            if old_size == 0 && store.zettel.len() >= self.max_zettel {
                return Err(BoxError::Capacity(format!(
                    "{} holds at most {} zettel",
                    self.location, self.max_zettel
                )));
            }
            let new_bytes = store.bytes - old_size + zettel_size(&zettel);
            if new_bytes > self.max_bytes {
                return Err(BoxError::Capacity(format!(
                    "{} holds at most {} bytes",
                    self.location, self.max_bytes
                )));
            }
            store.bytes = new_bytes;
            store.zettel.insert(zid, zettel);
        }
        self.ctx.notify(zid, UpdateReason::Zettel);
        Ok(())
    }

    async fn delete_zettel(&self, zid: Zid) -> Result<()> {
        self.ensure_running()?;
        {
            let mut store = self.store.write();
            let Some(old) = store.zettel.remove(&zid) else {
                return Err(BoxError::NotFound(zid));
            };
            store.bytes -= zettel_size(&old);
        }
        self.ctx.notify(zid, UpdateReason::Delete);
        Ok(())
    }

    fn read_stats(&self) -> BoxStats {
        BoxStats {
            read_only: false,
            zettel_count: self.store.read().zettel.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(uri: &str) -> MemBox {
        let b = MemBox::from_url(&Url::parse(uri).unwrap(), BoxContext::default()).unwrap();
        b.start().await.unwrap();
        b
    }

    fn note(title: &str, content: &str) -> Zettel {
        let mut meta = Meta::new(Zid::INVALID);
        meta.set("title", title);
        Zettel::new(meta, content)
    }

    #[tokio::test]
    async fn test_crud() {
        let b = started("mem:").await;
        let zid = b.create_zettel(note("One", "a")).await.unwrap();
        assert!(b.has_zettel(zid).await);
        assert_eq!(b.get_meta(zid).await.unwrap().get("title"), Some("One"));

        let mut changed = b.get_zettel(zid).await.unwrap();
        changed.content = b"b".to_vec();
        b.update_zettel(changed).await.unwrap();
        assert_eq!(b.get_zettel(zid).await.unwrap().content, b"b");

        b.delete_zettel(zid).await.unwrap();
        assert!(b.get_zettel(zid).await.unwrap_err().is_not_found());
        assert!(b.delete_zettel(zid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_max_zettel() {
        let b = started("mem:?max-zettel=2").await;
        b.create_zettel(note("a", "")).await.unwrap();
        b.create_zettel(note("b", "")).await.unwrap();
        let err = b.create_zettel(note("c", "")).await.unwrap_err();
        assert!(matches!(err, BoxError::Capacity(_)));
        assert_eq!(b.read_stats().zettel_count, 2);
    }

    #[tokio::test]
    async fn test_max_bytes() {
        let b = started("mem:?max-bytes=40").await;
        let zid = b.create_zettel(note("a", "0123456789")).await.unwrap();
        let err = b
            .create_zettel(note("b", "0123456789012345678901234567890"))
            .await
            .unwrap_err();
        assert!(matches!(err, BoxError::Capacity(_)));

        // Shrinking frees room.
        let mut small = b.get_zettel(zid).await.unwrap();
        small.content.clear();
        b.update_zettel(small).await.unwrap();
        b.create_zettel(note("b", "0123456789")).await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_box_rejects_requests() {
        let b = started("mem:").await;
        b.stop().await;
        assert!(matches!(
            b.get_zettel(Zid(20230101120000)).await,
            Err(BoxError::Stopped(_))
        ));
    }

    #[test]
    fn test_bad_limit_is_rejected() {
        let res = MemBox::from_url(
            &Url::parse("mem:?max-zettel=lots").unwrap(),
            BoxContext::default(),
        );
        assert!(matches!(res, Err(BoxError::InvalidUri(_))));
    }
}
