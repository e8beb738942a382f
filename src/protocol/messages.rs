use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Shared Types
// ============================================================================

/// GPS fix reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    pub lat: f64,
    pub lng: f64,

    /// Horizontal accuracy in meters
    #[serde(rename = "accuracyM")]
    pub accuracy_m: f64,
}

/// A ranked landmark guess returned by the vision collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Place name
    pub spot: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,

    /// Bounding box in image coordinates, if the provider returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Value>,
}

/// Narration preferences sent with `init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub language: String,
    /// Speech rate multiplier handed to synthesis
    #[serde(alias = "voiceSpeed")]
    pub voice_speed: f32,
    #[serde(alias = "detailLevel")]
    pub detail_level: String,
    pub interests: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            voice_speed: 1.0,
            detail_level: "medium".to_string(),
            interests: Vec::new(),
        }
    }
}

/// Where the photo comes from. Exactly one source is allowed per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Base64(String),
    Url(String),
}

impl ImageSource {
    /// Resolve the two optional wire fields into a single source.
    pub fn from_fields(
        image_base64: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        let base64 = image_base64.filter(|s| !s.trim().is_empty());
        let url = image_url.filter(|s| !s.trim().is_empty());

        match (base64, url) {
            (Some(data), None) => Ok(Self::Base64(data.to_string())),
            (None, Some(url)) => Ok(Self::Url(url.to_string())),
            (None, None) => Err(ProtocolError::InvalidInit(
                "one of imageBase64 or imageUrl is required".to_string(),
            )),
            (Some(_), Some(_)) => Err(ProtocolError::InvalidInit(
                "imageBase64 and imageUrl are mutually exclusive".to_string(),
            )),
        }
    }
}

// ============================================================================
// Client → Server
// ============================================================================

/// Body of an `init` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub device_id: String,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub identify_id: Option<String>,
    pub geo: Geo,
    #[serde(default)]
    pub prefs: Preferences,
}

/// A validated `init`, ready to start a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub device_id: String,
    pub image: ImageSource,
    pub identify_id: Option<String>,
    pub geo: Geo,
    pub prefs: Preferences,
}

impl InitRequest {
    pub fn validate(self) -> Result<SessionRequest, ProtocolError> {
        if self.device_id.trim().is_empty() {
            return Err(ProtocolError::InvalidInit("deviceId is required".to_string()));
        }

        let image =
            ImageSource::from_fields(self.image_base64.as_deref(), self.image_url.as_deref())?;

        Ok(SessionRequest {
            device_id: self.device_id,
            image,
            identify_id: self.identify_id.filter(|id| !id.is_empty()),
            geo: self.geo,
            prefs: self.prefs,
        })
    }
}

/// Body of a `replay` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub guide_id: String,
    #[serde(default)]
    pub from_ms: u64,
}

/// Messages sent by the client as JSON text
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Init(InitRequest),
    Replay(ReplayRequest),
    Nack { seq: u32 },
    Close {},
    Ping {
        #[serde(default)]
        ts: Option<i64>,
    },
}

impl ClientMessage {
    const KINDS: [&'static str; 5] = ["init", "replay", "nack", "close", "ping"];

    /// Decode one text message from the channel.
    ///
    /// Unknown `type` values and malformed bodies are reported as distinct
    /// errors so the caller can answer with the matching wire code.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
            None => return Err(ProtocolError::UnknownType("<missing>".to_string())),
        };

        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidBody {
            kind,
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// Server → Client
// ============================================================================

/// Control messages sent to the client as JSON text.
///
/// Audio is not part of this union; it travels as binary frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Meta {
        guide_id: String,
        title: String,
        spot: String,
        confidence: f32,
        estimated_duration_ms: u64,
    },
    Text {
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    Eos {
        guide_id: String,
        total_duration_ms: u64,
        transcript: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Pong {
        ts: i64,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn error_with_details(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self::Error {
            code: code.as_str().to_string(),
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Text { .. } => "text",
            Self::Eos { .. } => "eos",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }
}

/// Wire error codes carried in `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownMessageType,
    InvalidJson,
    InitError,
    ReplayError,
    NackError,
    UnsupportedBinary,
    SessionBusy,
    NotFound,
    NoSegments,
    NackUseReplay,
    StreamError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::InvalidJson => "INVALID_JSON",
            Self::InitError => "INIT_ERROR",
            Self::ReplayError => "REPLAY_ERROR",
            Self::NackError => "NACK_ERROR",
            Self::UnsupportedBinary => "UNSUPPORTED_BINARY",
            Self::SessionBusy => "SESSION_BUSY",
            Self::NotFound => "NOT_FOUND",
            Self::NoSegments => "NO_SEGMENTS",
            Self::NackUseReplay => "NACK_USE_REPLAY",
            Self::StreamError => "STREAM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problems with an inbound message. None of these close the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} message: {reason}")]
    InvalidBody { kind: String, reason: String },

    #[error("Invalid init message: {0}")]
    InvalidInit(String),

    #[error("Binary messages are not accepted from clients")]
    UnexpectedBinary,
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::UnknownType(_) => ErrorCode::UnknownMessageType,
            Self::InvalidBody { kind, .. } => match kind.as_str() {
                "init" => ErrorCode::InitError,
                "replay" => ErrorCode::ReplayError,
                "nack" => ErrorCode::NackError,
                _ => ErrorCode::UnknownMessageType,
            },
            Self::InvalidInit(_) => ErrorCode::InitError,
            Self::UnexpectedBinary => ErrorCode::UnsupportedBinary,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}
