// Shared fakes for the integration tests
//
// The fakes stand in for the vision, narration and speech providers so that
// whole sessions can run in-process over `ChannelLink::pair`.

#![allow(dead_code)]

use async_trait::async_trait;
use guide_stream::protocol::{Candidate, ClientMessage, Frame, FrameHeader, Geo, ImageSource};
use guide_stream::session::{
    ChannelDriver, ChannelLink, Inbound, Outgoing, ReplayHandler, SessionController, StreamConfig,
};
use guide_stream::session::Segment;
use guide_stream::storage::{
    GuideRecord, GuideStore, IdentifyRecord, MemoryGuideStore, MemoryObjectStore, ObjectStore,
    StorageError, StoredSegment,
};
use guide_stream::upstream::{
    NarrationGenerator, SpeechSynthesizer, UpstreamError, UpstreamTimeouts, Upstreams,
    VisionIdentifier,
};
use guide_stream::{create_router, AppState, ServerMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bytes per synthesized sentence: 1600 bytes at 128 kbps = 100 ms
pub const AUDIO_BYTES: usize = 1600;

pub struct FakeVision {
    pub candidates: Vec<Candidate>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeVision {
    pub fn spot(name: &str, confidence: f32) -> Self {
        Self {
            candidates: vec![Candidate {
                spot: name.to_string(),
                confidence,
                bbox: None,
            }],
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            candidates: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisionIdentifier for FakeVision {
    async fn identify(&self, _image: &ImageSource, _geo: &Geo) -> Result<Vec<Candidate>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(UpstreamError::Unavailable("vision down".to_string()));
        }
        Ok(self.candidates.clone())
    }
}

pub struct FakeNarrator {
    pub text: Option<String>,
    /// Last context handed to the narrator
    pub last_context: std::sync::Mutex<Option<String>>,
}

impl FakeNarrator {
    pub fn says(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            last_context: std::sync::Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            last_context: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl NarrationGenerator for FakeNarrator {
    async fn generate(&self, context: &str) -> Result<String, UpstreamError> {
        *self.last_context.lock().unwrap() = Some(context.to_string());
        self.text
            .clone()
            .ok_or_else(|| UpstreamError::Unavailable("narration down".to_string()))
    }
}

/// Returns `AUDIO_BYTES` bytes filled with the call index
pub struct FakeSpeech {
    /// Fail any sentence containing this marker
    pub fail_containing: Option<String>,
    pub delay: Duration,
    /// Extra delay for sentences containing the marker
    pub slow_containing: Option<(String, Duration)>,
    pub calls: AtomicUsize,
    /// Speed passed with the most recent call
    pub last_speed: std::sync::Mutex<Option<f32>>,
}

impl FakeSpeech {
    pub fn new() -> Self {
        Self {
            fail_containing: None,
            delay: Duration::ZERO,
            slow_containing: None,
            calls: AtomicUsize::new(0),
            last_speed: std::sync::Mutex::new(None),
        }
    }

    pub fn slow_on(marker: &str, delay: Duration) -> Self {
        Self {
            slow_containing: Some((marker.to_string(), delay)),
            ..Self::new()
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_containing: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, sentence: &str, speed: f32) -> Result<Vec<u8>, UpstreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_speed.lock().unwrap() = Some(speed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((marker, delay)) = &self.slow_containing {
            if sentence.contains(marker.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if let Some(marker) = &self.fail_containing {
            if sentence.contains(marker.as_str()) {
                return Err(UpstreamError::Unavailable("speech down".to_string()));
            }
        }
        Ok(vec![call as u8; AUDIO_BYTES])
    }
}

/// Every call fails, as if the disk or database were gone
pub struct FailingStore;

fn storage_down() -> StorageError {
    StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "storage down"))
}

#[async_trait]
impl GuideStore for FailingStore {
    async fn create_identify_session(&self, _record: IdentifyRecord) -> Result<(), StorageError> {
        Err(storage_down())
    }

    async fn get_identify_session(&self, _identify_id: &str) -> Result<Option<IdentifyRecord>, StorageError> {
        Err(storage_down())
    }

    async fn create_guide(&self, _record: GuideRecord) -> Result<(), StorageError> {
        Err(storage_down())
    }

    async fn create_segments_batch(&self, _guide_id: &str, _segments: &[Segment]) -> Result<(), StorageError> {
        Err(storage_down())
    }

    async fn get_segments(&self, _guide_id: &str) -> Result<Vec<StoredSegment>, StorageError> {
        Err(storage_down())
    }

    async fn guides_by_device(&self, _device_id: &str, _limit: usize) -> Result<Vec<GuideRecord>, StorageError> {
        Err(storage_down())
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, _key: &str, _data: &[u8]) -> Result<(), StorageError> {
        Err(storage_down())
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
        Err(storage_down())
    }
}

/// Memory object store whose writes take `delay` to land
pub struct SlowObjectStore {
    pub inner: MemoryObjectStore,
    pub delay: Duration,
}

impl SlowObjectStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl ObjectStore for SlowObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key).await
    }
}

/// Timeouts and stream tunables for a harness
pub struct HarnessOptions {
    pub timeouts: UpstreamTimeouts,
    pub stream: StreamConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            timeouts: UpstreamTimeouts {
                vision: Duration::from_secs(2),
                narration: Duration::from_secs(2),
                speech: Duration::from_secs(2),
            },
            stream: StreamConfig::default(),
        }
    }
}

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub replay: ReplayHandler,
    pub store: Arc<MemoryGuideStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub vision: Arc<FakeVision>,
    pub narrator: Arc<FakeNarrator>,
    pub speech: Arc<FakeSpeech>,
    pub upstreams: Upstreams,
    pub stream: StreamConfig,
}

impl Harness {
    pub fn new(vision: FakeVision, narrator: FakeNarrator, speech: FakeSpeech) -> Self {
        Self::with_options(vision, narrator, speech, HarnessOptions::default())
    }

    pub fn with_options(
        vision: FakeVision,
        narrator: FakeNarrator,
        speech: FakeSpeech,
        options: HarnessOptions,
    ) -> Self {
        let store = Arc::new(MemoryGuideStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let vision = Arc::new(vision);
        let narrator = Arc::new(narrator);
        let speech = Arc::new(speech);

        let upstreams = Upstreams {
            vision: vision.clone(),
            narration: narrator.clone(),
            speech: speech.clone(),
            timeouts: options.timeouts,
        };

        let controller = SessionController::new(
            upstreams.clone(),
            store.clone(),
            objects.clone(),
            options.stream.clone(),
        );

        Self {
            controller: Arc::new(controller),
            replay: ReplayHandler::new(store.clone(), objects.clone()),
            store,
            objects,
            vision,
            narrator,
            speech,
            upstreams,
            stream: options.stream,
        }
    }

    /// Full HTTP router over the same stores and fakes
    pub fn router(&self) -> axum::Router {
        let state = AppState::new(
            self.upstreams.clone(),
            self.store.clone(),
            self.objects.clone(),
            self.stream.clone(),
        );
        create_router(state)
    }

    /// Spawn a driver on a fresh in-process channel
    pub fn connect(&self) -> Client {
        spawn_driver(ChannelDriver::new(self.controller.clone(), self.replay.clone()))
    }

    /// Like `connect`, but sessions and replays use the given stores
    pub fn connect_with_storage(&self, store: Arc<dyn GuideStore>, objects: Arc<dyn ObjectStore>) -> Client {
        let controller = SessionController::new(
            self.upstreams.clone(),
            store.clone(),
            objects.clone(),
            self.stream.clone(),
        );
        let replay = ReplayHandler::new(store, objects);
        spawn_driver(ChannelDriver::new(Arc::new(controller), replay))
    }

    /// Wait until the guide record written after `eos` is visible
    pub async fn wait_for_guide(&self, guide_id: &str) -> bool {
        for _ in 0..100 {
            if self.store.get_guide(guide_id).await.is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Wait until the detached uploads have landed
    pub async fn wait_for_objects(&self, count: usize) -> bool {
        for _ in 0..100 {
            if self.objects.len().await >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

fn spawn_driver(driver: ChannelDriver) -> Client {
    let (link, tx, rx) = ChannelLink::pair(64);
    let task = tokio::spawn(async move { driver.run(link).await });
    Client { tx, rx, task }
}

pub struct Client {
    pub tx: mpsc::Sender<Inbound>,
    pub rx: mpsc::Receiver<Outgoing>,
    pub task: JoinHandle<()>,
}

impl Client {
    /// Send raw text the way the websocket reader would
    pub async fn send_text(&self, text: &str) {
        let inbound = match ClientMessage::decode(text) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Invalid(e),
        };
        self.tx.send(inbound).await.unwrap();
    }

    pub async fn send(&self, message: ClientMessage) {
        self.tx.send(Inbound::Message(message)).await.unwrap();
    }

    /// Next outgoing item, or `None` if the channel closed or went quiet
    pub async fn recv(&mut self) -> Option<Outgoing> {
        tokio::time::timeout(Duration::from_secs(3), self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Everything up to and including the next `eos`
    pub async fn recv_until_eos(&mut self) -> Vec<Outgoing> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            let done = matches!(item, Outgoing::Message(ServerMessage::Eos { .. }));
            items.push(item);
            if done {
                break;
            }
        }
        items
    }

    /// Everything until the driver closes the channel
    pub async fn recv_until_closed(&mut self) -> Vec<Outgoing> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    pub async fn recv_error_code(&mut self) -> Option<String> {
        match self.recv().await {
            Some(Outgoing::Message(ServerMessage::Error { code, .. })) => Some(code),
            _ => None,
        }
    }
}

pub fn init_json(image: &str) -> String {
    format!(
        r#"{{"type":"init","deviceId":"dev-1","imageBase64":"{}","geo":{{"lat":39.9,"lng":116.4,"accuracyM":5}}}}"#,
        image
    )
}

pub fn frames(items: &[Outgoing]) -> Vec<(FrameHeader, Vec<u8>)> {
    items
        .iter()
        .filter_map(|item| match item {
            Outgoing::Frame(bytes) => {
                let frame = Frame::decode(bytes).unwrap();
                Some((frame.header, frame.payload))
            }
            _ => None,
        })
        .collect()
}

pub fn deltas(items: &[Outgoing]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Outgoing::Message(ServerMessage::Text { delta }) => Some(delta.clone()),
            _ => None,
        })
        .collect()
}
