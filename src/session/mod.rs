//! Streaming guide sessions
//!
//! This module provides everything that runs on one client channel:
//! - Session lifecycle and phase tracking
//! - Sentence segmentation of the narration text
//! - Audio segment sequencing and timing (the ledger)
//! - Replay and NACK handling against persisted guides

mod channel;
mod config;
mod controller;
mod driver;
mod ledger;
mod replay;
mod segmenter;
mod state;

pub use channel::{ChannelLink, Inbound, Outbound, Outgoing, StopReason};
pub use config::StreamConfig;
pub use controller::{narration_context, SessionController, SessionEnd, SessionSummary};
pub use driver::ChannelDriver;
pub use ledger::{estimate_duration_ms, object_key, Segment, SegmentLedger};
pub use replay::{select_from, ReplayHandler, ReplayOutcome};
pub use segmenter::{sentences_with_tail, split_sentences, Segmented};
pub use state::{new_guide_id, provisional_title, SessionPhase, SessionState};
