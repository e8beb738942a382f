//! Binary audio frame codec
//!
//! Layout of one frame:
//!
//! ```text
//! +----------------+---------------------------+-------------------------+
//! | u32 BE length  | UTF-8 JSON header         | audio payload           |
//! | (header bytes) | {seq,start_ms,end_ms,     | (exactly bytes_len)     |
//! |                |  format,bytes_len}        |                         |
//! +----------------+---------------------------+-------------------------+
//! ```
//!
//! The same layout is used for live delivery and for replay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const LENGTH_PREFIX: usize = 4;

/// JSON header preceding each audio payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub seq: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub format: String,
    pub bytes_len: usize,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Frame header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error("Invalid frame header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("Payload length mismatch: header says {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// One decoded audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(&self.header, &self.payload)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (header, payload) = decode_frame(buf)?;
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Encode a header and its payload into one binary message.
///
/// Refuses to build a frame whose header disagrees with the payload size.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if header.bytes_len != payload.len() {
        return Err(FrameError::LengthMismatch {
            declared: header.bytes_len,
            actual: payload.len(),
        });
    }

    let header_bytes = serde_json::to_vec(header)?;
    let header_len =
        u32::try_from(header_bytes.len()).map_err(|_| FrameError::HeaderTooLarge(header_bytes.len()))?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX + header_bytes.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode one binary message into its header and a borrowed payload.
pub fn decode_frame(buf: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
    if buf.len() < LENGTH_PREFIX {
        return Err(FrameError::Truncated {
            needed: LENGTH_PREFIX,
            available: buf.len(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX]);
    let header_len = u32::from_be_bytes(prefix) as usize;

    let header_end = LENGTH_PREFIX
        .checked_add(header_len)
        .ok_or(FrameError::HeaderTooLarge(header_len))?;
    if buf.len() < header_end {
        return Err(FrameError::Truncated {
            needed: header_end,
            available: buf.len(),
        });
    }

    let header: FrameHeader = serde_json::from_slice(&buf[LENGTH_PREFIX..header_end])?;
    let payload = &buf[header_end..];

    if payload.len() != header.bytes_len {
        return Err(FrameError::LengthMismatch {
            declared: header.bytes_len,
            actual: payload.len(),
        });
    }

    Ok((header, payload))
}
