//! Directory boxes against a real temporary directory.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use url::Url;

use zettelbox::boxes::{
    BoxContext, BoxDefaults, DirBox, ManagedBox, UpdateInfo, UpdateReason, retrieve_all,
};
use zettelbox::watch::NotifierKind;
use zettelbox::{BoxError, Meta, Zettel, Zid};

/// Polling notifier; a long interval means only the initial listing counts.
fn defaults(poll_interval: Duration) -> BoxDefaults {
    BoxDefaults {
        dir_type: NotifierKind::Simple,
        poll_interval,
        retry_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

fn dir_uri(dir: &Path, options: &str) -> Url {
    Url::parse(&format!("dir://{}{options}", dir.display())).unwrap()
}

async fn started(dir: &Path, options: &str) -> DirBox {
    let ctx = BoxContext {
        number: 1,
        observer: None,
        defaults: defaults(Duration::from_secs(60)),
    };
    let b = DirBox::from_url(&dir_uri(dir, options), ctx).unwrap();
    b.start().await.unwrap();
    b
}

fn note(title: &str, syntax: &str, content: &str) -> Zettel {
    let mut meta = Meta::new(Zid::INVALID);
    meta.set("title", title);
    meta.set("syntax", syntax);
    Zettel::new(meta, content)
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .count()
}

#[tokio::test]
async fn test_worker_count_is_made_prime() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "?worker=4").await;
    assert_eq!(b.worker_count(), 5);
    b.stop().await;
}

#[tokio::test]
async fn test_create_three_delete_one() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "").await;

    let mut zids = Vec::new();
    for i in 0..3 {
        zids.push(
            b.create_zettel(note(&format!("Note {i}"), "markdown", "text"))
                .await
                .unwrap(),
        );
    }
    assert_eq!(b.num_dir_entries(), 3);
    // One .md and one .meta file per zettel.
    assert_eq!(count_files(dir.path()), 6);

    b.delete_zettel(zids[1]).await.unwrap();
    assert_eq!(b.num_dir_entries(), 2);
    assert!(!b.has_zettel(zids[1]).await);
    assert!(dir.path().join(format!("{}.md", zids[0])).exists());
    assert!(!dir.path().join(format!("{}.md", zids[1])).exists());

    let mut listed = Vec::new();
    b.apply_zid(&mut |zid| listed.push(zid), &retrieve_all)
        .await
        .unwrap();
    listed.sort();
    assert_eq!(listed, vec![zids[0], zids[2]]);
    b.stop().await;
}

#[tokio::test]
async fn test_zettel_lifecycle() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "").await;

    let zid = b.create_zettel(note("First", "zmk", "hello")).await.unwrap();
    let z = b.get_zettel(zid).await.unwrap();
    assert_eq!(z.meta.get("title"), Some("First"));
    assert_eq!(z.content, b"hello");
    // zmk content lives in a single .zettel file.
    assert!(dir.path().join(format!("{zid}.zettel")).exists());

    let mut changed = z.clone();
    changed.meta.set("title", "Second");
    changed.meta.set("syntax", "markdown");
    changed.content = b"# hello".to_vec();
    b.update_zettel(changed).await.unwrap();

    let z = b.get_zettel(zid).await.unwrap();
    assert_eq!(z.meta.get("title"), Some("Second"));
    assert_eq!(z.content, b"# hello");
    assert!(!dir.path().join(format!("{zid}.zettel")).exists());
    assert!(dir.path().join(format!("{zid}.md")).exists());
    assert!(dir.path().join(format!("{zid}.meta")).exists());

    b.delete_zettel(zid).await.unwrap();
    assert!(b.get_zettel(zid).await.unwrap_err().is_not_found());
    assert!(b.delete_zettel(zid).await.unwrap_err().is_not_found());
    assert_eq!(count_files(dir.path()), 0);
    b.stop().await;
}

#[tokio::test]
async fn test_better_extension_wins() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("20230101120000.txt"), "plain").unwrap();
    std::fs::write(dir.path().join("20230101120000.md"), "markdown").unwrap();
    std::fs::write(dir.path().join("20230101120000.meta"), "title: Both\n").unwrap();
    let b = started(dir.path(), "").await;

    let zid = Zid(20230101120000);
    let entry = b.get_dir_entry(zid).unwrap();
    assert_eq!(entry.content_name.as_deref(), Some("20230101120000.md"));
    assert_eq!(entry.useless_files, vec!["20230101120000.txt"]);

    let z = b.get_zettel(zid).await.unwrap();
    assert_eq!(z.content, b"markdown");
    assert_eq!(z.meta.get("title"), Some("Both"));
    assert_eq!(z.meta.get("syntax"), Some("markdown"));
    assert_eq!(z.meta.get("useless-files"), Some("20230101120000.txt"));
    b.stop().await;
}

#[tokio::test]
async fn test_read_only_box_rejects_changes() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("20230101120000.zettel"), "title: Kept\n\nbody").unwrap();
    let b = started(dir.path(), "?readonly").await;

    assert!(matches!(
        b.create_zettel(note("x", "zmk", "")).await,
        Err(BoxError::ReadOnly(_))
    ));
    assert!(matches!(
        b.delete_zettel(Zid(20230101120000)).await,
        Err(BoxError::ReadOnly(_))
    ));
    assert_eq!(
        b.get_zettel(Zid(20230101120000)).await.unwrap().content,
        b"body"
    );
    b.stop().await;
}

#[tokio::test]
async fn test_external_changes_are_noticed() {
    let dir = TempDir::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let ctx = BoxContext {
        number: 2,
        observer: Some(Arc::new(move |info: UpdateInfo| {
            sink.lock().unwrap().push(info)
        })),
        defaults: defaults(Duration::from_millis(50)),
    };
    let b = DirBox::from_url(&dir_uri(dir.path(), ""), ctx).unwrap();
    b.start().await.unwrap();

    std::fs::write(dir.path().join("20230101120000.zettel"), "title: Late\n\n").unwrap();
    let zid = Zid(20230101120000);
    let b = &b;
    assert!(eventually(move || b.has_zettel(zid)).await);
    assert!(
        eventually(|| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().iter().any(|i| {
                    i.zid == zid && i.reason == UpdateReason::Zettel && i.box_number == 2
                })
            }
        })
        .await
    );

    std::fs::remove_file(dir.path().join("20230101120000.zettel")).unwrap();
    assert!(eventually(move || async move { !b.has_zettel(zid).await }).await);
    b.stop().await;
}

#[tokio::test]
async fn test_metadata_scan_reads_all_entries() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "?worker=3").await;
    for i in 0..10 {
        b.create_zettel(note(&format!("N{i}"), "markdown", ""))
            .await
            .unwrap();
    }
    let mut titles = Vec::new();
    b.apply_meta(
        &mut |meta: Meta| titles.push(meta.get("title").unwrap_or_default().to_string()),
        &retrieve_all,
    )
    .await
    .unwrap();
    assert_eq!(titles.len(), 10);
    b.stop().await;
}

#[tokio::test]
async fn test_created_zettel_survive_concurrent_listings() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "").await;

    let mut zids = Vec::new();
    for i in 0..30 {
        b.refresh();
        let zid = b
            .create_zettel(note(&format!("Note {i}"), "zmk", "text"))
            .await
            .unwrap();
        assert!(b.has_zettel(zid).await);
        zids.push(zid);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    b.refresh();
    tokio::time::sleep(Duration::from_millis(200)).await;
    for zid in &zids {
        assert!(b.has_zettel(*zid).await, "lost {zid}");
    }
    assert_eq!(b.num_dir_entries(), 30);
    assert_eq!(count_files(dir.path()), 30);
    b.stop().await;
}

#[tokio::test]
async fn test_failed_delete_keeps_zettel() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "").await;
    let zid = b.create_zettel(note("Stuck", "zmk", "text")).await.unwrap();

    // A non-empty directory where the zettel file was cannot be removed.
    let path = dir.path().join(format!("{zid}.zettel"));
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("inner"), "x").unwrap();

    let err = b.delete_zettel(zid).await.unwrap_err();
    assert!(matches!(err, BoxError::Storage { .. }));
    assert!(b.has_zettel(zid).await);
    assert_eq!(b.num_dir_entries(), 1);
    b.stop().await;
}

#[tokio::test]
async fn test_line_breaks_in_title_do_not_corrupt_zettel() {
    let dir = TempDir::new().unwrap();
    let b = started(dir.path(), "").await;

    let zid = b
        .create_zettel(note("first\n\nsecond", "zmk", "body"))
        .await
        .unwrap();
    let z = b.get_zettel(zid).await.unwrap();
    assert_eq!(z.meta.get("title"), Some("first second"));
    assert_eq!(z.meta.get("syntax"), Some("zmk"));
    assert_eq!(z.content, b"body");
    b.stop().await;
}
