//! Stateless recovery requests: `replay` and `nack`
//!
//! Replay re-delivers persisted audio from an offset using the live frame
//! format. It never reconstructs text deltas.

use super::channel::Outbound;
use super::ledger::object_key;
use crate::protocol::{encode_frame, ErrorCode, FrameHeader, ReplayRequest, ServerMessage};
use crate::storage::{GuideStore, ObjectStore, StoredSegment};
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_FORMAT: &str = "mp3";

/// Segments that overlap or follow `from_ms`, in ascending `seq` order.
///
/// A segment with no recorded end is always included.
pub fn select_from(mut segments: Vec<StoredSegment>, from_ms: u64) -> Vec<StoredSegment> {
    segments.retain(|s| s.end_ms.map_or(true, |end| end > from_ms));
    segments.sort_by_key(|s| s.seq);
    segments
}

/// What a replay request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Delivered { frames: usize, skipped: usize },
    NotFound,
    NoSegments,
}

#[derive(Clone)]
pub struct ReplayHandler {
    store: Arc<dyn GuideStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ReplayHandler {
    pub fn new(store: Arc<dyn GuideStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    pub async fn replay(&self, request: &ReplayRequest, outbound: &Outbound) -> Result<ReplayOutcome> {
        info!("Replay requested for {} from {}ms", request.guide_id, request.from_ms);

        let segments = self
            .store
            .get_segments(&request.guide_id)
            .await
            .context("Failed to load guide segments")?;

        if segments.is_empty() {
            outbound
                .send_error(
                    ErrorCode::NotFound,
                    format!("Guide {} not found", request.guide_id),
                )
                .await?;
            return Ok(ReplayOutcome::NotFound);
        }

        let selected = select_from(segments, request.from_ms);
        if selected.is_empty() {
            outbound
                .send(ServerMessage::error_with_details(
                    ErrorCode::NoSegments,
                    format!(
                        "Guide {} has no audio after {}ms",
                        request.guide_id, request.from_ms
                    ),
                    json!({ "guideId": request.guide_id, "fromMs": request.from_ms }),
                ))
                .await?;
            return Ok(ReplayOutcome::NoSegments);
        }

        let mut frames = 0;
        let mut skipped = 0;
        for segment in &selected {
            let format = segment.format.as_deref().unwrap_or(DEFAULT_FORMAT);
            let key = segment
                .object_key
                .clone()
                .unwrap_or_else(|| object_key(&request.guide_id, segment.seq, format));

            let audio = match self.objects.get(&key).await {
                Ok(audio) => audio,
                Err(e) => {
                    warn!("Replay skipping segment {} ({}): {}", segment.seq, key, e);
                    skipped += 1;
                    continue;
                }
            };

            if let Some(expected) = segment.bytes_len {
                if expected != audio.len() {
                    warn!(
                        "Stored audio for segment {} is {} bytes, metadata says {}",
                        segment.seq,
                        audio.len(),
                        expected
                    );
                }
            }

            let start_ms = segment.start_ms.unwrap_or(0);
            let header = FrameHeader {
                seq: segment.seq,
                start_ms,
                end_ms: segment.end_ms.unwrap_or(start_ms),
                format: format.to_string(),
                bytes_len: audio.len(),
            };

            outbound.send_frame(encode_frame(&header, &audio)?).await?;
            frames += 1;
        }

        info!(
            "Replay of {} delivered {} frame(s), skipped {}",
            request.guide_id, frames, skipped
        );
        Ok(ReplayOutcome::Delivered { frames, skipped })
    }

    /// Point retransmission needs session context this path does not have,
    /// so the client is told to fall back to `replay`.
    pub async fn nack(&self, seq: u32, outbound: &Outbound) -> Result<()> {
        info!("NACK received for sequence {}", seq);
        outbound
            .send_error(
                ErrorCode::NackUseReplay,
                format!("Cannot retransmit segment {}; send a replay request instead", seq),
            )
            .await
    }
}
