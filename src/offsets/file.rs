use super::store::OffsetStore;
use super::{LedgerError, OffsetMap};
use crate::domain::{SourceOffset, SourcePartition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredOffsets {
    version: u32,
    updated_at: DateTime<Utc>,
    offsets: Vec<StoredOffset>,
}

#[derive(Serialize, Deserialize)]
struct StoredOffset {
    partition: SourcePartition,
    offset: SourceOffset,
}

/// Keeps committed offsets in a single JSON document.
///
/// Each write goes to a sibling temp file which is fsynced and then renamed
/// over the document, so a crash leaves either the old or the new mapping.
pub struct FileOffsetStore {
    path: PathBuf,
    cache: RwLock<OffsetMap>,
    write_lock: Mutex<()>,
}

impl FileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(OffsetMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn load(&self) -> Result<OffsetMap, LedgerError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No offset document yet, starting empty");
                return Ok(OffsetMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredOffsets = serde_json::from_slice(&data)?;
        if stored.version != DOCUMENT_VERSION {
            return Err(LedgerError::UnsupportedVersion(stored.version));
        }

        Ok(stored
            .offsets
            .into_iter()
            .map(|entry| (entry.partition, entry.offset))
            .collect())
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn start(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let loaded = self.load().await?;
        tracing::debug!(
            path = %self.path.display(),
            partitions = loaded.len(),
            "Loaded committed offsets"
        );
        *self.cache.write() = loaded;
        Ok(())
    }

    async fn get(&self, partitions: &[SourcePartition]) -> Result<OffsetMap, LedgerError> {
        let cache = self.cache.read();
        Ok(partitions
            .iter()
            .filter_map(|p| cache.get(p).map(|o| (p.clone(), o.clone())))
            .collect())
    }

    async fn set(&self, offsets: OffsetMap) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;

        let mut merged = self.cache.read().clone();
        merged.extend(offsets);

        let mut entries: Vec<StoredOffset> = merged
            .iter()
            .map(|(partition, offset)| StoredOffset {
                partition: partition.clone(),
                offset: offset.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.partition.cmp(&b.partition));

        let document = StoredOffsets {
            version: DOCUMENT_VERSION,
            updated_at: Utc::now(),
            offsets: entries,
        };
        let serialized = serde_json::to_vec_pretty(&document)?;

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&serialized).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &self.path).await?;

        *self.cache.write() = merged;

        tracing::trace!(
            path = %self.path.display(),
            bytes = serialized.len(),
            "Wrote offset document"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn partition(name: &str) -> SourcePartition {
        SourcePartition::new().with("filename", name)
    }

    #[tokio::test]
    async fn test_offsets_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");

        let store = FileOffsetStore::new(&path);
        store.start().await.unwrap();
        store
            .set(OffsetMap::from([(
                partition("a.log"),
                SourceOffset::new().with("position", 120),
            )]))
            .await
            .unwrap();

        let reopened = FileOffsetStore::new(&path);
        reopened.start().await.unwrap();
        let found = reopened.get(&[partition("a.log")]).await.unwrap();
        assert_eq!(
            found.get(&partition("a.log")),
            Some(&SourceOffset::new().with("position", 120))
        );
    }

    #[tokio::test]
    async fn test_missing_document_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileOffsetStore::new(dir.path().join("nested/offsets.json"));
        store.start().await.unwrap();
        assert!(store.get(&[partition("x")]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_merge_with_existing_partitions() {
        let dir = TempDir::new().unwrap();
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        store.start().await.unwrap();

        store
            .set(OffsetMap::from([(partition("a"), SourceOffset::new().with("position", 1))]))
            .await
            .unwrap();
        store
            .set(OffsetMap::from([(partition("b"), SourceOffset::new().with("position", 2))]))
            .await
            .unwrap();

        let found = store.get(&[partition("a"), partition("b")]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(
            &path,
            r#"{"version":9,"updated_at":"2024-01-01T00:00:00Z","offsets":[]}"#,
        )
        .unwrap();

        let store = FileOffsetStore::new(&path);
        assert!(matches!(
            store.start().await,
            Err(LedgerError::UnsupportedVersion(9))
        ));
    }
}
