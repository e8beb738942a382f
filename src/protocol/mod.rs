//! Streaming channel wire contract
//!
//! - JSON text messages tagged by `type` (client and server unions)
//! - Length-prefixed binary frames carrying audio segments

pub mod frame;
pub mod messages;

pub use frame::{decode_frame, encode_frame, Frame, FrameError, FrameHeader};
pub use messages::{
    Candidate, ClientMessage, ErrorCode, Geo, ImageSource, InitRequest, Preferences,
    ProtocolError, ReplayRequest, ServerMessage, SessionRequest,
};
