use super::{
    validate_key, GuideRecord, GuideStore, IdentifyRecord, ObjectStore, StorageError, StoredSegment,
};
use crate::session::Segment;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Guide store kept in process memory
#[derive(Default)]
pub struct MemoryGuideStore {
    guides: RwLock<HashMap<String, GuideRecord>>,
    segments: RwLock<HashMap<String, Vec<StoredSegment>>>,
    identify_sessions: RwLock<HashMap<String, IdentifyRecord>>,
}

impl MemoryGuideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_guide(&self, guide_id: &str) -> Option<GuideRecord> {
        self.guides.read().await.get(guide_id).cloned()
    }

    /// Insert segment rows directly (e.g. rows written by another process)
    pub async fn insert_segments(&self, guide_id: &str, rows: Vec<StoredSegment>) {
        let mut segments = self.segments.write().await;
        let entry = segments.entry(guide_id.to_string()).or_default();
        merge_rows(entry, rows);
    }
}

/// Insert rows, replacing any with the same `seq`, keeping `seq` order
pub(super) fn merge_rows(existing: &mut Vec<StoredSegment>, rows: Vec<StoredSegment>) {
    for row in rows {
        existing.retain(|s| s.seq != row.seq);
        existing.push(row);
    }
    existing.sort_by_key(|s| s.seq);
}

#[async_trait]
impl GuideStore for MemoryGuideStore {
    async fn create_identify_session(&self, record: IdentifyRecord) -> Result<(), StorageError> {
        let mut sessions = self.identify_sessions.write().await;
        sessions.insert(record.identify_id.clone(), record);
        Ok(())
    }

    async fn get_identify_session(
        &self,
        identify_id: &str,
    ) -> Result<Option<IdentifyRecord>, StorageError> {
        Ok(self.identify_sessions.read().await.get(identify_id).cloned())
    }

    async fn create_guide(&self, record: GuideRecord) -> Result<(), StorageError> {
        let mut guides = self.guides.write().await;
        guides.insert(record.guide_id.clone(), record);
        Ok(())
    }

    async fn create_segments_batch(
        &self,
        guide_id: &str,
        segments: &[Segment],
    ) -> Result<(), StorageError> {
        let rows = segments
            .iter()
            .map(|s| StoredSegment::from_segment(guide_id, s))
            .collect();
        self.insert_segments(guide_id, rows).await;
        Ok(())
    }

    async fn get_segments(&self, guide_id: &str) -> Result<Vec<StoredSegment>, StorageError> {
        Ok(self
            .segments
            .read()
            .await
            .get(guide_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn guides_by_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<GuideRecord>, StorageError> {
        let guides = self.guides.read().await;
        let mut found: Vec<GuideRecord> = guides
            .values()
            .filter(|g| g.device_id == device_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        Ok(found)
    }
}

/// Object store kept in process memory
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SegmentLedger;
    use chrono::{Duration, Utc};

    fn guide(id: &str, device: &str, age_secs: i64) -> GuideRecord {
        GuideRecord {
            guide_id: id.to_string(),
            device_id: device.to_string(),
            spot: None,
            title: "t".to_string(),
            confidence: None,
            transcript: String::new(),
            duration_ms: 0,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_persist_guide_with_segments() {
        let store = MemoryGuideStore::new();
        let mut ledger = SegmentLedger::new("guide_1");
        for _ in 0..2 {
            let segment = ledger.next_segment(1600, "mp3", 128);
            ledger.append(segment).unwrap();
        }

        store
            .persist_guide(guide("guide_1", "dev", 0), ledger.segments())
            .await
            .unwrap();

        let rows = store.get_segments("guide_1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].start_ms, Some(100));
        assert!(store.get_guide("guide_1").await.is_some());
        assert!(store.get_segments("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guides_by_device_newest_first() {
        let store = MemoryGuideStore::new();
        store.create_guide(guide("old", "dev", 100)).await.unwrap();
        store.create_guide(guide("new", "dev", 1)).await.unwrap();
        store.create_guide(guide("other", "dev-2", 0)).await.unwrap();

        let found = store.guides_by_device("dev", 20).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|g| g.guide_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(store.guides_by_device("dev", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_object_roundtrip_and_missing() {
        let store = MemoryObjectStore::new();
        store.put("guide_1/0000.mp3", &[1, 2, 3]).await.unwrap();
        assert_eq!(store.get("guide_1/0000.mp3").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            store.get("guide_1/0001.mp3").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(store.put("../escape", &[0]).await.is_err());
    }
}
