//! Upstream collaborators consumed by the session controller
//!
//! One trait per capability, so providers can be swapped without touching
//! the controller:
//! - `VisionIdentifier`: photo + GPS fix → ranked landmark candidates
//! - `NarrationGenerator`: context → complete narration text
//! - `SpeechSynthesizer`: one sentence → encoded audio bytes

mod image;
mod openai;

pub use image::normalize_base64;
pub use openai::{OpenAiNarrator, OpenAiSpeech, OpenAiVision};

use crate::config::UpstreamConfig;
use crate::protocol::{Candidate, Geo, ImageSource};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {after:?}")]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait VisionIdentifier: Send + Sync {
    /// Ranked candidates, best first. May be empty.
    async fn identify(&self, image: &ImageSource, geo: &Geo)
        -> Result<Vec<Candidate>, UpstreamError>;
}

#[async_trait]
pub trait NarrationGenerator: Send + Sync {
    /// Generate the whole narration for `context` in one request.
    async fn generate(&self, context: &str) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one sentence into encoded audio. `speed` is a playback rate
    /// multiplier, 1.0 being normal speech.
    async fn synthesize(&self, sentence: &str, speed: f32) -> Result<Vec<u8>, UpstreamError>;
}

/// Per-call deadlines for each collaborator
#[derive(Debug, Clone, Copy)]
pub struct UpstreamTimeouts {
    pub vision: Duration,
    pub narration: Duration,
    pub speech: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            vision: Duration::from_secs(30),
            narration: Duration::from_secs(60),
            speech: Duration::from_secs(30),
        }
    }
}

/// The capability set handed to the session controller
#[derive(Clone)]
pub struct Upstreams {
    pub vision: Arc<dyn VisionIdentifier>,
    pub narration: Arc<dyn NarrationGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub timeouts: UpstreamTimeouts,
}

impl Upstreams {
    /// Build the OpenAI-compatible providers described by the config
    pub fn from_config(config: &UpstreamConfig, audio_format: &str) -> Result<Self> {
        if config.api_key.is_empty() {
            warn!("No upstream API key configured; upstream calls will be rejected");
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            vision: Arc::new(OpenAiVision::new(client.clone(), config)),
            narration: Arc::new(OpenAiNarrator::new(client.clone(), config)),
            speech: Arc::new(OpenAiSpeech::new(client, config, audio_format)),
            timeouts: UpstreamTimeouts {
                vision: Duration::from_secs(config.vision.timeout_secs),
                narration: Duration::from_secs(config.narration.timeout_secs),
                speech: Duration::from_secs(config.speech.timeout_secs),
            },
        })
    }
}

/// Run an upstream call under a deadline. Expiry becomes that collaborator's
/// ordinary failure.
pub async fn bounded<T, F>(service: &'static str, after: Duration, call: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout { service, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), UpstreamError> = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(UpstreamError::Timeout { service: "slow", .. })));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded("fast", Duration::from_secs(1), async { Ok::<_, UpstreamError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
