//! Persistence collaborators
//!
//! - `GuideStore`: guide records, their segment metadata and identify sessions
//! - `ObjectStore`: raw audio payloads keyed by segment object key
//!
//! Both are best effort from the streaming protocol's point of view: failures
//! are logged by callers and never reach the wire.

mod fs;
mod memory;

pub use fs::{FsGuideStore, FsObjectStore};
pub use memory::{MemoryGuideStore, MemoryObjectStore};

use crate::config::{StorageBackend, StorageConfig};
use crate::session::Segment;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A completed (or interrupted) guide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideRecord {
    pub guide_id: String,
    pub device_id: String,
    pub spot: Option<String>,
    pub title: String,
    pub confidence: Option<f32>,
    pub transcript: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of a standalone identify call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRecord {
    pub identify_id: String,
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub spot: Option<String>,
    pub confidence: Option<f32>,
    pub bbox: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Segment metadata as persisted. Columns are nullable, so replay must cope
/// with partially written rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSegment {
    pub guide_id: String,
    pub seq: u32,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub bytes_len: Option<usize>,
    pub object_key: Option<String>,
}

impl StoredSegment {
    pub fn from_segment(guide_id: &str, segment: &Segment) -> Self {
        Self {
            guide_id: guide_id.to_string(),
            seq: segment.seq,
            start_ms: Some(segment.start_ms),
            end_ms: Some(segment.end_ms),
            format: Some(segment.format.clone()),
            bitrate_kbps: Some(segment.bitrate_kbps),
            bytes_len: Some(segment.bytes_len),
            object_key: Some(segment.object_key.clone()),
        }
    }
}

#[async_trait]
pub trait GuideStore: Send + Sync {
    async fn create_identify_session(&self, record: IdentifyRecord) -> Result<(), StorageError>;

    async fn get_identify_session(&self, identify_id: &str)
        -> Result<Option<IdentifyRecord>, StorageError>;

    async fn create_guide(&self, record: GuideRecord) -> Result<(), StorageError>;

    async fn create_segments_batch(&self, guide_id: &str, segments: &[Segment])
        -> Result<(), StorageError>;

    /// Persisted segments for a guide, ordered by `seq`. Empty if unknown.
    async fn get_segments(&self, guide_id: &str) -> Result<Vec<StoredSegment>, StorageError>;

    /// Most recent guides for a device, newest first
    async fn guides_by_device(&self, device_id: &str, limit: usize)
        -> Result<Vec<GuideRecord>, StorageError>;

    /// Guide record plus its ledger as one logical write. Segments go first,
    /// so a visible guide record always has its segments in place.
    async fn persist_guide(&self, record: GuideRecord, segments: &[Segment]) -> Result<(), StorageError> {
        if !segments.is_empty() {
            self.create_segments_batch(&record.guide_id, segments).await?;
        }
        self.create_guide(record).await
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Open the stores selected by the config
pub fn open(config: &StorageConfig) -> Result<(Arc<dyn GuideStore>, Arc<dyn ObjectStore>)> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage (guides are lost on restart)");
            Ok((
                Arc::new(MemoryGuideStore::new()),
                Arc::new(MemoryObjectStore::new()),
            ))
        }
        StorageBackend::Fs => {
            info!("Using filesystem storage at {}", config.root.display());
            Ok((
                Arc::new(FsGuideStore::new(config.root.join("db"))?),
                Arc::new(FsObjectStore::new(config.root.join("audio"))?),
            ))
        }
    }
}

/// Reject keys that could escape a storage root
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.trim().is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
