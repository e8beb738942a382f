use serde::{Deserialize, Serialize};

/// Tunables for streaming sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Codec tag sent in frame headers and used for object keys
    pub audio_format: String,

    /// Declared bitrate of synthesized audio, used to estimate durations
    pub bitrate_kbps: u32,

    /// Duration hint sent in `meta` before anything is generated
    pub estimated_duration_ms: u64,

    /// Spot name shown in `meta` while identification is still running
    pub provisional_spot: String,

    /// Substituted for the narration when generation fails
    pub apology: String,

    /// Outbound queue depth per channel
    pub outbound_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            audio_format: "mp3".to_string(),
            bitrate_kbps: 128,
            estimated_duration_ms: 120_000, // 2 minutes
            provisional_spot: "Identifying...".to_string(),
            apology: "Sorry, the guide service is temporarily unavailable.".to_string(),
            outbound_buffer: 64,
        }
    }
}
