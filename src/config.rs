use crate::session::StreamConfig;
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// OpenAI-compatible endpoint shared by all three collaborators
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub vision: VisionConfig,
    pub narration: NarrationConfig,
    pub speech: SpeechConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            vision: VisionConfig::default(),
            narration: NarrationConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub model: String,
    pub instructions: String,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            instructions: "You are a friendly local who gives short, lively introductions \
                           to nearby sights. Speak naturally, in complete sentences."
                .to_string(),
            max_output_tokens: 1000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub model: String,
    pub voice: String,
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory (lost on restart)
    Memory,
    /// JSON documents and audio files under `root`
    Fs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Load `path` (any format the `config` crate understands, extension
    /// optional) and apply `GUIDE_STREAM__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GUIDE_STREAM").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
