//! Flat-directory artifact store.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use beatcast_models::ArtifactInfo;

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{move_file, write_atomic, PARTIAL_PREFIX};

/// Filename prefix of every export.
pub const ARTIFACT_PREFIX: &str = "beatcast";

const MAX_NAME_LEN: usize = 255;

/// Persisted exports under one directory, served below `url_base`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    url_base: String,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>, url_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_base: url_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh, unique export name with the given extension.
    pub fn artifact_name(&self, extension: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.{}",
            ARTIFACT_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8],
            extension.trim_start_matches('.')
        )
    }

    /// Public location of a stored artifact.
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.url_base, urlencoding::encode(name))
    }

    /// Write a buffer as `name`.
    pub async fn persist_bytes(&self, name: &str, bytes: &[u8]) -> StorageResult<ArtifactInfo> {
        let path = self.checked_path(name)?;
        write_atomic(&path, bytes)
            .await
            .map_err(|e| StorageError::write_failed(format!("{}: {}", name, e)))?;
        info!(artifact = %name, size = bytes.len(), "Persisted artifact");
        self.describe(name, &path).await
    }

    /// Move an existing file into the store as `name`.
    pub async fn persist_file(&self, src: impl AsRef<Path>, name: &str) -> StorageResult<ArtifactInfo> {
        let path = self.checked_path(name)?;
        move_file(src.as_ref(), &path)
            .await
            .map_err(|e| StorageError::write_failed(format!("{}: {}", name, e)))?;
        info!(artifact = %name, "Persisted artifact from {}", src.as_ref().display());
        self.describe(name, &path).await
    }

    /// All stored artifacts, newest first.
    pub async fn list(&self) -> StorageResult<Vec<ArtifactInfo>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::ListFailed(e.to_string())),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_err() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            artifacts.push(self.info_from_metadata(&name, &metadata));
        }

        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        debug!(count = artifacts.len(), "Listed artifacts");
        Ok(artifacts)
    }

    /// Resolve a stored artifact for download.
    pub async fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        let path = self.checked_path(name)?;
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            Ok(_) => Err(StorageError::not_found(name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    fn checked_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn describe(&self, name: &str, path: &Path) -> StorageResult<ArtifactInfo> {
        let metadata = fs::metadata(path).await?;
        Ok(self.info_from_metadata(name, &metadata))
    }

    fn info_from_metadata(&self, name: &str, metadata: &std::fs::Metadata) -> ArtifactInfo {
        let created_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        ArtifactInfo {
            name: name.to_string(),
            size: metadata.len(),
            created_at,
            url: self.url_for(name),
        }
    }
}

/// Accept plain file names only: no separators, no hidden or partial files.
pub fn validate_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.starts_with(PARTIAL_PREFIX)
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::invalid_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path().join("exports"), "/exports/")
    }

    #[tokio::test]
    async fn test_persist_and_resolve() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let info = store.persist_bytes("beatcast_a.webm", b"raw").await.unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(info.url, "/exports/beatcast_a.webm");

        let path = assert_ok!(store.path_for("beatcast_a.webm").await);
        assert_eq!(fs::read(path).await.unwrap(), b"raw");
    }

    #[tokio::test]
    async fn test_persist_file_moves_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = dir.path().join("transcoded.mp4");
        fs::write(&src, b"mp4").await.unwrap();

        let info = store.persist_file(&src, "beatcast_b.mp4").await.unwrap();
        assert_eq!(info.name, "beatcast_b.mp4");
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.persist_bytes("beatcast_1.mp4", b"1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.persist_bytes("beatcast_2.mp4", b"22").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.persist_bytes("beatcast_3.webm", b"333").await.unwrap();

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["beatcast_3.webm", "beatcast_2.mp4", "beatcast_1.mp4"]);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for name in ["../etc/passwd", "a/b.mp4", ".hidden", "", "x..mp4"] {
            assert!(matches!(
                store.path_for(name).await,
                Err(StorageError::InvalidName(_))
            ));
        }
        assert!(matches!(
            store.path_for("missing.mp4").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_artifact_name_shape() {
        let store = ArtifactStore::new("/tmp/x", "/exports");
        let name = store.artifact_name("mp4");
        assert!(name.starts_with("beatcast_"));
        assert!(name.ends_with(".mp4"));
        assert_ok!(validate_name(&name));
        assert_ne!(name, store.artifact_name("mp4"));
    }
}
