use super::memory::merge_rows;
use super::{
    validate_key, GuideRecord, GuideStore, IdentifyRecord, ObjectStore, StorageError, StoredSegment,
};
use crate::session::Segment;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Write to a temp file next to `target`, then rename over it
async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp = target.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&temp, target).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Guide store persisted as JSON documents:
///
/// ```text
/// <root>/guides/<guide_id>/guide.json
/// <root>/guides/<guide_id>/segments.json
/// <root>/identify/<identify_id>.json
/// ```
pub struct FsGuideStore {
    root: PathBuf,
    /// Serializes read-modify-write of segment documents
    segments_lock: Mutex<()>,
}

impl FsGuideStore {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        if root.as_os_str().is_empty() {
            return Err(StorageError::InvalidKey("storage root is empty".to_string()));
        }
        Ok(Self {
            root,
            segments_lock: Mutex::new(()),
        })
    }

    fn guide_dir(&self, guide_id: &str) -> Result<PathBuf, StorageError> {
        validate_id(guide_id)?;
        Ok(self.root.join("guides").join(guide_id))
    }

    fn identify_path(&self, identify_id: &str) -> Result<PathBuf, StorageError> {
        validate_id(identify_id)?;
        Ok(self.root.join("identify").join(format!("{}.json", identify_id)))
    }
}

fn validate_id(id: &str) -> Result<(), StorageError> {
    validate_key(id)?;
    if id.contains('/') {
        return Err(StorageError::InvalidKey(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl GuideStore for FsGuideStore {
    async fn create_identify_session(&self, record: IdentifyRecord) -> Result<(), StorageError> {
        let path = self.identify_path(&record.identify_id)?;
        write_json(&path, &record).await
    }

    async fn get_identify_session(
        &self,
        identify_id: &str,
    ) -> Result<Option<IdentifyRecord>, StorageError> {
        read_json(&self.identify_path(identify_id)?).await
    }

    async fn create_guide(&self, record: GuideRecord) -> Result<(), StorageError> {
        let path = self.guide_dir(&record.guide_id)?.join("guide.json");
        write_json(&path, &record).await
    }

    async fn create_segments_batch(
        &self,
        guide_id: &str,
        segments: &[Segment],
    ) -> Result<(), StorageError> {
        let path = self.guide_dir(guide_id)?.join("segments.json");
        let _guard = self.segments_lock.lock().await;

        let mut rows: Vec<StoredSegment> = read_json(&path).await?.unwrap_or_default();
        merge_rows(
            &mut rows,
            segments
                .iter()
                .map(|s| StoredSegment::from_segment(guide_id, s))
                .collect(),
        );
        write_json(&path, &rows).await
    }

    async fn get_segments(&self, guide_id: &str) -> Result<Vec<StoredSegment>, StorageError> {
        let path = self.guide_dir(guide_id)?.join("segments.json");
        let mut rows: Vec<StoredSegment> = read_json(&path).await?.unwrap_or_default();
        rows.sort_by_key(|s| s.seq);
        Ok(rows)
    }

    async fn guides_by_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<GuideRecord>, StorageError> {
        let dir = self.root.join("guides");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join("guide.json");
            match read_json::<GuideRecord>(&path).await {
                Ok(Some(guide)) if guide.device_id == device_id => found.push(guide),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable guide {}: {}", path.display(), e),
            }
        }

        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }
}

/// Audio payloads stored as plain files under `root`, one per object key
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        if root.as_os_str().is_empty() {
            return Err(StorageError::InvalidKey("storage root is empty".to_string()));
        }
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        write_atomic(&path, data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
