use crate::protocol::FrameHeader;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// One unit of synthesized audio delivered during a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Position in emission order (0-indexed, gap-free)
    pub seq: u32,

    /// Start offset in the narration, equal to the previous segment's `end_ms`
    pub start_ms: u64,

    /// End offset, estimated from payload size and declared bitrate
    pub end_ms: u64,

    /// Codec tag (e.g. "mp3")
    pub format: String,

    /// Declared bitrate used for the duration estimate
    pub bitrate_kbps: u32,

    /// Exact byte length of the audio payload
    pub bytes_len: usize,

    /// Storage key for the payload
    pub object_key: String,
}

impl Segment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn frame_header(&self) -> FrameHeader {
        FrameHeader {
            seq: self.seq,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            format: self.format.clone(),
            bytes_len: self.bytes_len,
        }
    }
}

/// Deterministic storage path for a segment payload, e.g. `guide_ab12/0003.mp3`
pub fn object_key(guide_id: &str, seq: u32, format: &str) -> String {
    format!("{}/{:04}.{}", guide_id, seq, format)
}

/// Playback duration implied by a constant bitrate.
///
/// This is an estimate, not a decode: `bits / kbps = ms`.
pub fn estimate_duration_ms(bytes_len: usize, bitrate_kbps: u32) -> u64 {
    if bitrate_kbps == 0 {
        return 0;
    }
    (bytes_len as u64 * 8) / u64::from(bitrate_kbps)
}

/// Ordered record of the segments emitted by one session
#[derive(Debug, Clone)]
pub struct SegmentLedger {
    guide_id: String,
    segments: Vec<Segment>,
    total_duration_ms: u64,
}

impl SegmentLedger {
    pub fn new(guide_id: impl Into<String>) -> Self {
        Self {
            guide_id: guide_id.into(),
            segments: Vec::new(),
            total_duration_ms: 0,
        }
    }

    /// Sequence number the next appended segment will carry
    pub fn next_seq(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Describe the segment a payload of `bytes_len` would become, without
    /// recording it. The ledger only advances once the frame is delivered.
    pub fn next_segment(&self, bytes_len: usize, format: &str, bitrate_kbps: u32) -> Segment {
        let seq = self.next_seq();
        let start_ms = self.total_duration_ms;

        Segment {
            seq,
            start_ms,
            end_ms: start_ms + estimate_duration_ms(bytes_len, bitrate_kbps),
            format: format.to_string(),
            bitrate_kbps,
            bytes_len,
            object_key: object_key(&self.guide_id, seq, format),
        }
    }

    /// Record a delivered segment, advancing the counter and running total.
    pub fn append(&mut self, segment: Segment) -> Result<()> {
        ensure!(
            segment.seq == self.next_seq(),
            "segment seq {} out of order (expected {})",
            segment.seq,
            self.next_seq()
        );
        ensure!(
            segment.start_ms == self.total_duration_ms && segment.end_ms >= segment.start_ms,
            "segment {} is not contiguous: [{}, {}) after {}ms",
            segment.seq,
            segment.start_ms,
            segment.end_ms,
            self.total_duration_ms
        );

        self.total_duration_ms = segment.end_ms;
        self.segments.push(segment);
        Ok(())
    }
}
