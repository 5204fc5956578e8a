//! File I/O helpers used by the file workers.

use std::path::{Path, PathBuf};

use tokio::fs as tokio_fs;

use crate::error::{BoxError, Result};

/// Read a whole file.
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio_fs::read(path)
        .await
        .map_err(|e| BoxError::Storage {
            operation: "read",
            path: path.to_path_buf(),
            source: e,
        })
}

/// Name of the temporary file used while writing `path`.
///
/// The leading dot hides it from directory listings, so a half-written file
/// is never mistaken for a zettel file.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write file atomically using temp file and rename.
///
/// Either the new content is fully written, or the original file remains
/// unchanged.
pub async fn write_file_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = temp_path(path);

    tokio_fs::write(&temp_path, content)
        .await
        .map_err(|e| BoxError::Storage {
            operation: "write",
            path: temp_path.clone(),
            source: e,
        })?;

    if let Err(e) = tokio_fs::rename(&temp_path, path).await {
        let _ = tokio_fs::remove_file(&temp_path).await;
        return Err(BoxError::Storage {
            operation: "rename",
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// Delete a file. A file that is already gone counts as deleted.
pub async fn delete_file(path: &Path) -> Result<()> {
    match tokio_fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BoxError::Storage {
            operation: "delete",
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// True for names the directory box never treats as zettel files.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("20230101120000.zettel");
        write_file_atomic(&path, b"title: x\n\nbody").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), b"title: x\n\nbody");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("20230101120000.txt");
        write_file_atomic(&path, b"old").await.unwrap();
        write_file_atomic(&path, b"new").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_ok() {
        let tmp = TempDir::new().unwrap();
        delete_file(&tmp.path().join("nothing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_file_reports_path() {
        let tmp = TempDir::new().unwrap();
        let err = read_file(&tmp.path().join("gone.meta")).await.unwrap_err();
        assert!(err.to_string().contains("gone.meta"));
    }

    #[test]
    fn test_temp_path_is_hidden() {
        let p = temp_path(Path::new("/x/20230101120000.meta"));
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(is_hidden_name(&name));
        assert_eq!(name, ".20230101120000.meta.tmp");
    }
}
