pub mod config;
pub mod http;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod upstream;

pub use config::Config;
pub use http::{create_router, AppState};
pub use protocol::{
    decode_frame, encode_frame, ClientMessage, ErrorCode, FrameHeader, ServerMessage,
};
pub use session::{
    ChannelDriver, ChannelLink, ReplayHandler, Segment, SegmentLedger, SessionController,
    SessionEnd, StreamConfig,
};
pub use storage::{GuideStore, ObjectStore};
pub use upstream::{NarrationGenerator, SpeechSynthesizer, Upstreams, VisionIdentifier};
