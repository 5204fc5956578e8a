//! On-disk representation of a zettel.
//!
//! A zettel is a `.zettel` file (metadata header, empty line, content) or
//! a `.meta` file plus a content file with any other extension. These
//! functions run inside a file worker; they never touch the entry table.

use std::path::Path;

use super::entry::DirEntry;
use crate::error::Result;
use crate::fs::{delete_file, read_file, write_file_atomic};
use crate::meta::Meta;
use crate::meta::keys::{KEY_SYNTAX, KEY_USELESS_FILES};
use crate::syntax::{self, DEFAULT_SYNTAX};
use crate::zettel::Zettel;

/// Read the metadata of `entry`.
pub async fn read_meta(dir: &Path, entry: &DirEntry) -> Result<Meta> {
    let mut meta = match (&entry.meta_name, &entry.content_name) {
        (Some(name), _) => {
            let data = read_file(&dir.join(name)).await?;
            Meta::parse(entry.zid, &String::from_utf8_lossy(&data))
        }
        (None, Some(name)) if entry.has_meta_in_content() => {
            let data = read_file(&dir.join(name)).await?;
            Meta::parse_header(entry.zid, &data).0
        }
        _ => Meta::new(entry.zid),
    };
    complete_meta(&mut meta, entry);
    Ok(meta)
}

/// Read metadata and content of `entry`.
pub async fn read_zettel(dir: &Path, entry: &DirEntry) -> Result<Zettel> {
    let Some(content_name) = &entry.content_name else {
        let meta = read_meta(dir, entry).await?;
        return Ok(Zettel::new(meta, Vec::new()));
    };

    let data = read_file(&dir.join(content_name)).await?;
    let (mut meta, content) = if entry.has_meta_in_content() {
        let (header_meta, offset) = Meta::parse_header(entry.zid, &data);
        let meta = match &entry.meta_name {
            Some(name) => {
                let text = read_file(&dir.join(name)).await?;
                Meta::parse(entry.zid, &String::from_utf8_lossy(&text))
            }
            None => header_meta,
        };
        (meta, data[offset..].to_vec())
    } else {
        let meta = match &entry.meta_name {
            Some(name) => {
                let text = read_file(&dir.join(name)).await?;
                Meta::parse(entry.zid, &String::from_utf8_lossy(&text))
            }
            None => Meta::new(entry.zid),
        };
        (meta, data)
    };
    complete_meta(&mut meta, entry);
    Ok(Zettel::new(meta, content))
}

/// Fill in what the file names say about the zettel.
fn complete_meta(meta: &mut Meta, entry: &DirEntry) {
    if !meta.has(KEY_SYNTAX) {
        let ext = entry.content_ext();
        let syntax_name = if ext.is_empty() {
            DEFAULT_SYNTAX
        } else {
            syntax::syntax_for_ext(ext)
        };
        meta.set(KEY_SYNTAX, syntax_name);
    }
    if !entry.useless_files.is_empty() {
        meta.set(KEY_USELESS_FILES, &entry.useless_files.join(" "));
    }
}

/// Write `zettel` to the files named by `entry`, then remove `obsolete`.
///
/// The metadata must already be free of computed properties.
pub async fn write_zettel(
    dir: &Path,
    entry: &DirEntry,
    obsolete: &[String],
    zettel: &Zettel,
) -> Result<()> {
    let meta = &zettel.meta;
    if let Some(content_name) = &entry.content_name {
        if entry.has_meta_in_content() {
            let mut data = meta.to_text().into_bytes();
            data.push(b'\n');
            data.extend_from_slice(&zettel.content);
            write_file_atomic(&dir.join(content_name), &data).await?;
        } else {
            write_file_atomic(&dir.join(content_name), &zettel.content).await?;
        }
    }
    if let Some(meta_name) = &entry.meta_name {
        write_file_atomic(&dir.join(meta_name), meta.to_text().as_bytes()).await?;
    }
    for name in obsolete {
        delete_file(&dir.join(name)).await?;
    }
    Ok(())
}

/// Remove every file of `entry`, including useless ones.
pub async fn delete_zettel(dir: &Path, entry: &DirEntry) -> Result<()> {
    for name in entry.file_names() {
        delete_file(&dir.join(name)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::id::Zid;

    const ZID: Zid = Zid(20230101120000);

    fn entry_with(files: &[&str]) -> DirEntry {
        let mut entry = DirEntry::new(ZID);
        for f in files {
            entry.add_file(f);
        }
        entry
    }

    #[tokio::test]
    async fn test_read_zettel_file_with_header() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("20230101120000.zettel"),
            "title: Hello\nrole: note\n\nSome *content*\n",
        )
        .unwrap();
        let entry = entry_with(&["20230101120000.zettel"]);

        let zettel = read_zettel(tmp.path(), &entry).await.unwrap();
        assert_eq!(zettel.meta.get("title"), Some("Hello"));
        assert_eq!(zettel.meta.get("syntax"), Some("zmk"));
        assert_eq!(zettel.content, b"Some *content*\n");

        let meta = read_meta(tmp.path(), &entry).await.unwrap();
        assert_eq!(meta, zettel.meta);
    }

    #[tokio::test]
    async fn test_read_meta_plus_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("20230101120000.meta"), "title: Pic\n").unwrap();
        fs::write(tmp.path().join("20230101120000.png"), [0x89u8, 0x50, 0x4e]).unwrap();
        fs::write(tmp.path().join("20230101120000.gif"), [0x47u8]).unwrap();
        let entry = entry_with(&[
            "20230101120000.meta",
            "20230101120000.gif",
            "20230101120000.png",
        ]);

        let zettel = read_zettel(tmp.path(), &entry).await.unwrap();
        assert_eq!(zettel.meta.get("title"), Some("Pic"));
        assert_eq!(zettel.meta.get("syntax"), Some("png"));
        assert_eq!(zettel.meta.get("useless-files"), Some("20230101120000.gif"));
        assert_eq!(zettel.content, vec![0x89, 0x50, 0x4e]);
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut meta = Meta::new(ZID);
        meta.set("title", "Round");
        meta.set("syntax", "markdown");
        let zettel = Zettel::new(meta, "# Heading\n");
        let (entry, obsolete) = DirEntry::new(ZID).for_write(&zettel.meta, false);

        write_zettel(tmp.path(), &entry, &obsolete, &zettel).await.unwrap();
        assert!(tmp.path().join("20230101120000.md").exists());
        assert!(tmp.path().join("20230101120000.meta").exists());

        let back = read_zettel(tmp.path(), &entry).await.unwrap();
        assert_eq!(back, zettel);
    }

    #[tokio::test]
    async fn test_write_removes_obsolete_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("20230101120000.meta"), "title: x\n").unwrap();
        fs::write(tmp.path().join("20230101120000.txt"), "old").unwrap();
        let current = entry_with(&["20230101120000.meta", "20230101120000.txt"]);

        let mut meta = Meta::new(ZID);
        meta.set("syntax", "zmk");
        let zettel = Zettel::new(meta, "new");
        let (entry, obsolete) = current.for_write(&zettel.meta, false);
        write_zettel(tmp.path(), &entry, &obsolete, &zettel).await.unwrap();

        assert!(tmp.path().join("20230101120000.zettel").exists());
        assert!(!tmp.path().join("20230101120000.meta").exists());
        assert!(!tmp.path().join("20230101120000.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_removes_all_files() {
        let tmp = TempDir::new().unwrap();
        for name in ["20230101120000.zettel", "20230101120000.txt"] {
            fs::write(tmp.path().join(name), "x").unwrap();
        }
        let entry = entry_with(&["20230101120000.zettel", "20230101120000.txt"]);
        delete_zettel(tmp.path(), &entry).await.unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
