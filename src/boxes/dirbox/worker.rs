//! Sharded file workers.
//!
//! Every file operation for one zettel goes to the same worker, picked by
//! hashing the identifier. Operations on one zettel are therefore
//! serialized, while different zettel are handled in parallel.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::entry::DirEntry;
use super::files;
use crate::error::{BoxError, Result};
use crate::id::Zid;
use crate::meta::Meta;
use crate::zettel::Zettel;

pub const MIN_WORKERS: u32 = 1;
pub const MAX_WORKERS: u32 = 1499;
pub const DEFAULT_WORKERS: u32 = 7;

/// Pending commands per worker before senders have to wait.
const QUEUE_CAPACITY: usize = 64;

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

pub fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut d = 3u32;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Smallest prime not less than `n`.
pub fn make_prime(n: u32) -> u32 {
    let mut p = n.max(2);
    while !is_prime(p) {
        p += 1;
    }
    p
}

/// Worker index for `zid` in a pool of `n` workers.
pub fn route(zid: Zid, n: u32) -> usize {
    let (lo, hi) = zid.halves();
    let mut sum = FNV_OFFSET ^ lo;
    sum = sum.wrapping_mul(FNV_PRIME);
    sum ^= hi;
    sum = sum.wrapping_mul(FNV_PRIME);
    (sum % n.max(1)) as usize
}

enum Command {
    GetMeta {
        entry: DirEntry,
        reply: oneshot::Sender<Result<Meta>>,
    },
    GetZettel {
        entry: DirEntry,
        reply: oneshot::Sender<Result<Zettel>>,
    },
    SetZettel {
        entry: DirEntry,
        obsolete: Vec<String>,
        zettel: Zettel,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        entry: DirEntry,
        reply: oneshot::Sender<Result<()>>,
    },
    #[cfg(test)]
    Crash { reply: oneshot::Sender<Result<()>> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::GetMeta { .. } => "get-meta",
            Command::GetZettel { .. } => "get-zettel",
            Command::SetZettel { .. } => "set-zettel",
            Command::Delete { .. } => "delete",
            #[cfg(test)]
            Command::Crash { .. } => "crash",
        }
    }

    async fn execute(self, dir: &Path) {
        // A caller that went away no longer wants the result.
        match self {
            Command::GetMeta { entry, reply } => {
                let _ = reply.send(files::read_meta(dir, &entry).await);
            }
            Command::GetZettel { entry, reply } => {
                let _ = reply.send(files::read_zettel(dir, &entry).await);
            }
            Command::SetZettel {
                entry,
                obsolete,
                zettel,
                reply,
            } => {
                let _ = reply.send(files::write_zettel(dir, &entry, &obsolete, &zettel).await);
            }
            Command::Delete { entry, reply } => {
                let _ = reply.send(files::delete_zettel(dir, &entry).await);
            }
            #[cfg(test)]
            Command::Crash { reply } => {
                drop(reply);
                panic!("worker crash requested");
            }
        }
    }
}

/// Fixed set of file workers for one directory.
pub struct WorkerPool {
    queues: RwLock<Vec<mpsc::Sender<Command>>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `make_prime(count)` workers operating on `dir`.
    ///
    /// `shutdown` aborts callers waiting for a full queue.
    pub fn start(dir: &Path, count: u32, shutdown: CancellationToken) -> Self {
        let count = make_prime(count.clamp(MIN_WORKERS, MAX_WORKERS));
        let queues = (0..count as usize)
            .map(|index| {
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                tokio::spawn(run_worker(index, dir.to_path_buf(), rx));
                tx
            })
            .collect();
        tracing::debug!("started {count} file workers for {}", dir.display());
        Self {
            queues: RwLock::new(queues),
            shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    pub async fn get_meta(&self, entry: DirEntry) -> Result<Meta> {
        let zid = entry.zid;
        self.submit(zid, |reply| Command::GetMeta { entry, reply })
            .await
    }

    pub async fn get_zettel(&self, entry: DirEntry) -> Result<Zettel> {
        let zid = entry.zid;
        self.submit(zid, |reply| Command::GetZettel { entry, reply })
            .await
    }

    pub async fn set_zettel(
        &self,
        entry: DirEntry,
        obsolete: Vec<String>,
        zettel: Zettel,
    ) -> Result<()> {
        let zid = entry.zid;
        self.submit(zid, |reply| Command::SetZettel {
            entry,
            obsolete,
            zettel,
            reply,
        })
        .await
    }

    pub async fn delete(&self, entry: DirEntry) -> Result<()> {
        let zid = entry.zid;
        self.submit(zid, |reply| Command::Delete { entry, reply })
            .await
    }

    /// Close every queue. Workers finish what is queued, then exit.
    pub fn shutdown(&self) {
        self.queues.write().clear();
    }

    async fn submit<T>(
        &self,
        zid: Zid,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let queue = {
            let queues = self.queues.read();
            if queues.is_empty() {
                return Err(BoxError::Stopped("file workers are shut down".to_string()));
            }
            queues[route(zid, queues.len() as u32)].clone()
        };

        let (reply, result) = oneshot::channel();
        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            res = queue.send(command(reply)) => res.is_ok(),
        };
        if !sent {
            return Err(BoxError::Stopped(format!("no worker accepts {zid}")));
        }

        // Queued commands are drained even during shutdown, so this resolves.
        result
            .await
            .unwrap_or_else(|_| Err(BoxError::Worker(format!("worker dropped request for {zid}"))))
    }

    #[cfg(test)]
    async fn crash(&self, zid: Zid) -> Result<()> {
        self.submit(zid, |reply| Command::Crash { reply }).await
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(index: usize, dir: PathBuf, mut queue: mpsc::Receiver<Command>) {
    while let Some(command) = queue.recv().await {
        let name = command.name();
        if let Err(payload) = AssertUnwindSafe(command.execute(&dir))
            .catch_unwind()
            .await
        {
            tracing::error!(
                "file worker {index} panicked during {name}: {}\n{}",
                panic_message(payload.as_ref()),
                Backtrace::force_capture()
            );
        }
    }
    tracing::trace!("file worker {index} stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_is_prime() {
        let primes: Vec<u32> = (0..30).filter(|&n| is_prime(n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert!(is_prime(1499));
        assert!(!is_prime(1501));
    }

    #[test]
    fn test_make_prime_is_prime_and_not_smaller() {
        for n in 1..2000 {
            let p = make_prime(n);
            assert!(is_prime(p), "make_prime({n}) = {p}");
            assert!(p >= n);
        }
        assert_eq!(make_prime(4), 5);
        assert_eq!(make_prime(7), 7);
        assert_eq!(make_prime(1), 2);
    }

    #[test]
    fn test_route_is_stable_and_in_range() {
        let zid = Zid(20230101120000);
        let first = route(zid, 5);
        for _ in 0..10 {
            assert_eq!(route(zid, 5), first);
        }
        assert!(first < 5);
    }

    #[test]
    fn test_route_spreads_sequential_ids() {
        let used: HashSet<usize> = (0..100)
            .map(|i| route(Zid(20230101120000 + i), 7))
            .collect();
        assert!(used.len() > 1);
    }

    #[tokio::test]
    async fn test_pool_size_is_prime() {
        let tmp = TempDir::new().unwrap();
        let pool = WorkerPool::start(tmp.path(), 4, CancellationToken::new());
        assert_eq!(pool.len(), 5);
        let pool = WorkerPool::start(tmp.path(), 5000, CancellationToken::new());
        assert_eq!(pool.len(), 1499);
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let tmp = TempDir::new().unwrap();
        let pool = WorkerPool::start(tmp.path(), 3, CancellationToken::new());
        let zid = Zid(20230101120000);
        let mut meta = Meta::new(zid);
        meta.set("title", "Pool");
        meta.set("syntax", "zmk");
        let zettel = Zettel::new(meta, "body");
        let (entry, obsolete) = DirEntry::new(zid).for_write(&zettel.meta, false);

        pool.set_zettel(entry.clone(), obsolete, zettel.clone())
            .await
            .unwrap();
        let back = pool.get_zettel(entry.clone()).await.unwrap();
        assert_eq!(back, zettel);
        let meta = pool.get_meta(entry.clone()).await.unwrap();
        assert_eq!(meta.get("title"), Some("Pool"));

        pool.delete(entry.clone()).await.unwrap();
        assert!(pool.get_zettel(entry).await.is_err());
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("20230101120000.zettel"), "title: x\n\nbody").unwrap();
        let pool = WorkerPool::start(tmp.path(), 1, CancellationToken::new());
        let zid = Zid(20230101120000);

        let err = pool.crash(zid).await.unwrap_err();
        assert!(matches!(err, BoxError::Worker(_)));

        let mut entry = DirEntry::new(zid);
        entry.add_file("20230101120000.zettel");
        let zettel = pool.get_zettel(entry).await.unwrap();
        assert_eq!(zettel.content, b"body");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let tmp = TempDir::new().unwrap();
        let pool = WorkerPool::start(tmp.path(), 2, CancellationToken::new());
        pool.shutdown();
        let err = pool
            .get_meta(DirEntry::new(Zid(20230101120000)))
            .await
            .unwrap_err();
        assert!(matches!(err, BoxError::Stopped(_)));
    }

    #[tokio::test]
    async fn test_io_errors_reach_caller() {
        let tmp = TempDir::new().unwrap();
        let pool = WorkerPool::start(tmp.path(), 2, CancellationToken::new());
        let mut entry = DirEntry::new(Zid(20230101120000));
        entry.add_file("20230101120000.zettel");
        assert!(pool.get_zettel(entry).await.is_err());
    }
}
