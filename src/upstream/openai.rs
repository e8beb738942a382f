use super::{normalize_base64, NarrationGenerator, SpeechSynthesizer, UpstreamError, VisionIdentifier};
use crate::config::UpstreamConfig;
use crate::protocol::{Candidate, Geo, ImageSource};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const UNKNOWN_SPOT: &str = "Unknown place";

// ============================================================================
// Shared plumbing
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Endpoint {
    fn new(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn post(&self, service: &'static str, path: &str, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        if self.api_key.is_empty() {
            return Err(UpstreamError::Unavailable(format!("{} has no API key configured", service)));
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service,
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn chat(&self, service: &'static str, body: &Value) -> Result<String, UpstreamError> {
        let completion: ChatCompletion = self
            .post(service, "/chat/completions", body)
            .await?
            .json()
            .await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| UpstreamError::InvalidResponse {
                service,
                reason: "no choices in completion".to_string(),
            })
    }
}

// ============================================================================
// Vision
// ============================================================================

/// Landmark identification through a vision-capable chat model
pub struct OpenAiVision {
    endpoint: Endpoint,
    model: String,
    max_tokens: u32,
}

impl OpenAiVision {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            endpoint: Endpoint::new(client, config),
            model: config.vision.model.clone(),
            max_tokens: config.vision.max_tokens,
        }
    }

    fn prompt(geo: &Geo) -> String {
        format!(
            "Identify the landmark, building or attraction in this photo. \
             It was taken near latitude {}, longitude {}. \
             Reply with JSON only: {{\"candidates\": [{{\"spot\": \"<name>\", \
             \"confidence\": <0..1>, \"bbox\": {{\"x\":0,\"y\":0,\"width\":0,\"height\":0}}}}]}}, \
             best guess first. bbox is optional.",
            geo.lat, geo.lng
        )
    }
}

#[async_trait]
impl VisionIdentifier for OpenAiVision {
    async fn identify(&self, image: &ImageSource, geo: &Geo) -> Result<Vec<Candidate>, UpstreamError> {
        let image_url = match image {
            ImageSource::Base64(data) => format!("data:image/jpeg;base64,{}", normalize_base64(data)),
            ImageSource::Url(url) => url.clone(),
        };

        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": Self::prompt(geo)},
                    {"type": "image_url", "image_url": {"url": image_url}},
                ],
            }],
            "max_tokens": self.max_tokens,
        });

        let content = self.endpoint.chat("vision", &body).await?;
        let candidates = parse_candidates(&content);
        info!("Vision returned {} candidate(s)", candidates.len());
        Ok(candidates)
    }
}

#[derive(Debug, Deserialize)]
struct CandidateList {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    spot: Option<String>,
    confidence: Option<f32>,
    bbox: Option<Value>,
}

/// Turn the model's reply into candidates.
///
/// JSON replies (optionally inside a code fence) are parsed; a plain-text
/// reply becomes a single low-confidence candidate named by its first line.
fn parse_candidates(content: &str) -> Vec<Candidate> {
    let trimmed = strip_code_fence(content.trim());
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('{') {
        return match serde_json::from_str::<CandidateList>(trimmed) {
            Ok(list) => list
                .candidates
                .into_iter()
                .map(|raw| Candidate {
                    spot: raw
                        .spot
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_SPOT.to_string()),
                    confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                    bbox: raw.bbox.filter(|b| !b.is_null()),
                })
                .collect(),
            Err(e) => {
                warn!("Vision reply looked like JSON but did not parse: {}", e);
                Vec::new()
            }
        };
    }

    let name: String = trimmed.lines().next().unwrap_or_default().chars().take(50).collect();
    vec![Candidate {
        spot: name,
        confidence: 0.6,
        bbox: None,
    }]
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

// ============================================================================
// Narration
// ============================================================================

/// Narration text through a chat model (single request, not token-streamed)
pub struct OpenAiNarrator {
    endpoint: Endpoint,
    model: String,
    instructions: String,
    max_output_tokens: u32,
}

impl OpenAiNarrator {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            endpoint: Endpoint::new(client, config),
            model: config.narration.model.clone(),
            instructions: config.narration.instructions.clone(),
            max_output_tokens: config.narration.max_output_tokens,
        }
    }
}

#[async_trait]
impl NarrationGenerator for OpenAiNarrator {
    async fn generate(&self, context: &str) -> Result<String, UpstreamError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.instructions},
                {"role": "user", "content": context},
            ],
            "max_tokens": self.max_output_tokens,
        });

        let text = self.endpoint.chat("narration", &body).await?;
        debug!("Narration generated ({} chars)", text.chars().count());
        Ok(text)
    }
}

// ============================================================================
// Speech
// ============================================================================

/// Sentence synthesis through the `audio/speech` endpoint
pub struct OpenAiSpeech {
    endpoint: Endpoint,
    model: String,
    voice: String,
    format: String,
}

impl OpenAiSpeech {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig, format: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, config),
            model: config.speech.model.clone(),
            voice: config.speech.voice.clone(),
            format: format.to_string(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, sentence: &str, speed: f32) -> Result<Vec<u8>, UpstreamError> {
        let body = json!({
            "model": self.model,
            "voice": self.voice,
            "input": sentence,
            "response_format": self.format,
            "speed": speech_speed(speed),
        });

        let bytes = self.endpoint.post("speech", "/audio/speech", &body).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Clamp to the range the speech endpoint accepts; non-finite means normal speed
fn speech_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.clamp(0.25, 4.0)
    } else {
        1.0
    }
}
