use super::channel::{ChannelLink, Outbound, StopReason};
use super::config::StreamConfig;
use super::segmenter::sentences_with_tail;
use super::state::{new_guide_id, SessionPhase, SessionState};
use crate::protocol::{encode_frame, Candidate, ErrorCode, ServerMessage, SessionRequest};
use crate::storage::{GuideRecord, GuideStore, ObjectStore};
use crate::upstream::{bounded, Upstreams};
use anyhow::{ensure, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Completed(SessionSummary),
    Cancelled(StopReason),
}

/// Totals reported when a session reaches `eos`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub guide_id: String,
    pub sentences: usize,
    pub segments: usize,
    pub total_duration_ms: u64,
}

/// Drives one streaming session end to end:
/// identify → generate → (segment → text → synthesize → frame)* → eos.
///
/// Upstream failures are absorbed so a started session still reaches `eos`
/// whenever the channel allows it.
pub struct SessionController {
    upstreams: Upstreams,
    store: Arc<dyn GuideStore>,
    objects: Arc<dyn ObjectStore>,
    config: StreamConfig,
}

impl SessionController {
    pub fn new(
        upstreams: Upstreams,
        store: Arc<dyn GuideStore>,
        objects: Arc<dyn ObjectStore>,
        config: StreamConfig,
    ) -> Self {
        Self {
            upstreams,
            store,
            objects,
            config,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Run a session on `link` until `eos`, cancellation or failure.
    ///
    /// On failure a `STREAM_ERROR` is attempted before returning the error;
    /// the caller should close the channel. Whatever was delivered before the
    /// failure is still persisted, including when the failure is the client
    /// going away mid-write.
    pub async fn run(&self, request: SessionRequest, link: &mut ChannelLink) -> Result<SessionEnd> {
        let mut state = SessionState::new(new_guide_id(), request);
        info!(
            "Session {} started (device={}, lat={}, lng={})",
            state.guide_id, state.request.device_id, state.request.geo.lat, state.request.geo.lng
        );

        match self.drive(&mut state, link).await {
            Ok(end) => Ok(end),
            Err(e) => {
                error!(
                    "Session {} failed during {:?}: {:#}",
                    state.guide_id,
                    state.phase(),
                    e
                );
                if state.phase().can_transition_to(SessionPhase::ErrorReported) {
                    state.transition(SessionPhase::ErrorReported)?;
                }
                if let Err(send_err) = link
                    .outbound
                    .send_error(ErrorCode::StreamError, e.to_string())
                    .await
                {
                    debug!("Could not report stream error: {}", send_err);
                }
                if !state.phase().is_terminal() {
                    state.transition(SessionPhase::Closed)?;
                }
                if state.sentences_sent > 0 {
                    self.persist(&mut state).await;
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, state: &mut SessionState, link: &mut ChannelLink) -> Result<SessionEnd> {
        state.transition(SessionPhase::Identifying)?;
        self.send_meta(state, &link.outbound).await?;

        state.candidate = self.identify(state).await;
        if let Some(reason) = link.poll_control().await? {
            return self.cancel(state, reason).await;
        }

        state.transition(SessionPhase::Generating)?;
        let text = self.generate(state).await;

        state.transition(SessionPhase::Segmenting)?;
        for sentence in sentences_with_tail(&text) {
            // Safe point: nothing of the previous sentence is left in flight
            if let Some(reason) = link.poll_control().await? {
                return self.cancel(state, reason).await;
            }
            self.emit_sentence(state, sentence, &link.outbound).await?;
        }

        state.transition(SessionPhase::Finalizing)?;
        let summary = self.finalize(state, &link.outbound).await?;
        state.transition(SessionPhase::Closed)?;

        Ok(SessionEnd::Completed(summary))
    }

    /// Early feedback, sent before identification or generation finish
    async fn send_meta(&self, state: &SessionState, outbound: &Outbound) -> Result<()> {
        outbound
            .send(ServerMessage::Meta {
                guide_id: state.guide_id.clone(),
                title: state.title.clone(),
                spot: self.config.provisional_spot.clone(),
                confidence: 0.0,
                estimated_duration_ms: self.config.estimated_duration_ms,
            })
            .await?;
        info!("Meta sent for {}: {}", state.guide_id, state.title);
        Ok(())
    }

    /// Best identification guess. Never fails: a missing guess only makes the
    /// narration less specific.
    async fn identify(&self, state: &SessionState) -> Option<Candidate> {
        if let Some(identify_id) = &state.request.identify_id {
            match self.store.get_identify_session(identify_id).await {
                Ok(Some(record)) => {
                    if let Some(spot) = record.spot {
                        info!("Session {} reuses identification {}: {}", state.guide_id, identify_id, spot);
                        return Some(Candidate {
                            spot,
                            confidence: record.confidence.unwrap_or(0.0),
                            bbox: record.bbox,
                        });
                    }
                }
                Ok(None) => warn!("Identify session {} not found, identifying again", identify_id),
                Err(e) => warn!("Failed to load identify session {}: {}", identify_id, e),
            }
        }

        let call = self
            .upstreams
            .vision
            .identify(&state.request.image, &state.request.geo);
        match bounded("vision", self.upstreams.timeouts.vision, call).await {
            Ok(candidates) => {
                let best = candidates.into_iter().next();
                match &best {
                    Some(c) => info!("Session {} identified {} ({:.2})", state.guide_id, c.spot, c.confidence),
                    None => info!("Session {}: no landmark candidates", state.guide_id),
                }
                best
            }
            Err(e) => {
                warn!("Vision failed for {}, continuing without a spot: {}", state.guide_id, e);
                None
            }
        }
    }

    /// Full narration text, or the apology sentence if generation fails
    async fn generate(&self, state: &SessionState) -> String {
        let context = narration_context(&state.request, state.candidate.as_ref());
        let call = self.upstreams.narration.generate(&context);

        match bounded("narration", self.upstreams.timeouts.narration, call).await {
            Ok(text) if !text.trim().is_empty() => {
                info!("Narration for {} generated ({} chars)", state.guide_id, text.chars().count());
                text
            }
            Ok(_) => {
                warn!("Narration for {} came back empty, using apology", state.guide_id);
                self.config.apology.clone()
            }
            Err(e) => {
                warn!("Narration failed for {}, using apology: {}", state.guide_id, e);
                self.config.apology.clone()
            }
        }
    }

    /// Text delta, then (if synthesis succeeds) its audio frame
    async fn emit_sentence(&self, state: &mut SessionState, sentence: &str, outbound: &Outbound) -> Result<()> {
        outbound
            .send(ServerMessage::Text {
                delta: sentence.to_string(),
            })
            .await?;
        state.record_text(sentence);

        state.transition(SessionPhase::Synthesizing)?;
        let spoken = sentence.trim();
        if !spoken.chars().any(char::is_alphanumeric) {
            debug!("Nothing to speak in {:?}", sentence);
            return state.transition(SessionPhase::Segmenting);
        }

        let call = self.upstreams.speech.synthesize(spoken, state.request.prefs.voice_speed);
        let audio = match bounded("speech", self.upstreams.timeouts.speech, call).await {
            Ok(audio) if !audio.is_empty() => audio,
            Ok(_) => {
                warn!("Speech returned no audio for sentence {} of {}", state.sentences_sent, state.guide_id);
                return state.transition(SessionPhase::Segmenting);
            }
            Err(e) => {
                warn!("Speech failed for sentence {} of {}: {}", state.sentences_sent, state.guide_id, e);
                return state.transition(SessionPhase::Segmenting);
            }
        };

        state.transition(SessionPhase::Delivering)?;
        ensure!(
            self.config.bitrate_kbps > 0,
            "cannot time audio segments with a bitrate of 0 kbps"
        );
        let segment = state
            .ledger
            .next_segment(audio.len(), &self.config.audio_format, self.config.bitrate_kbps);
        let frame = encode_frame(&segment.frame_header(), &audio)?;
        outbound.send_frame(frame).await?;

        info!(
            "Audio segment {} sent for {} ({} bytes, {}-{}ms)",
            segment.seq, state.guide_id, segment.bytes_len, segment.start_ms, segment.end_ms
        );
        let key = segment.object_key.clone();
        state.ledger.append(segment)?;
        let upload = self.spawn_upload(key, audio);
        state.uploads.push(upload);

        state.transition(SessionPhase::Segmenting)
    }

    /// Detached upload; the main loop never waits for it
    fn spawn_upload(&self, key: String, audio: Vec<u8>) -> JoinHandle<()> {
        let objects = Arc::clone(&self.objects);
        tokio::spawn(async move {
            match objects.put(&key, &audio).await {
                Ok(()) => debug!("Uploaded {} ({} bytes)", key, audio.len()),
                Err(e) => warn!("Audio upload failed for {}: {}", key, e),
            }
        })
    }

    async fn finalize(&self, state: &mut SessionState, outbound: &Outbound) -> Result<SessionSummary> {
        outbound
            .send(ServerMessage::Eos {
                guide_id: state.guide_id.clone(),
                total_duration_ms: state.ledger.total_duration_ms(),
                transcript: state.transcript.clone(),
            })
            .await?;
        info!(
            "Eos sent for {} ({} segments, {}ms)",
            state.guide_id,
            state.ledger.len(),
            state.ledger.total_duration_ms()
        );

        self.persist(state).await;

        Ok(SessionSummary {
            guide_id: state.guide_id.clone(),
            sentences: state.sentences_sent,
            segments: state.ledger.len(),
            total_duration_ms: state.ledger.total_duration_ms(),
        })
    }

    async fn cancel(&self, state: &mut SessionState, reason: StopReason) -> Result<SessionEnd> {
        info!(
            "Session {} interrupted ({:?}) after {} sentence(s)",
            state.guide_id, reason, state.sentences_sent
        );
        state.transition(SessionPhase::Closed)?;

        // Keep what was delivered so the client can recover it with `replay`
        if state.sentences_sent > 0 {
            self.persist(state).await;
        }
        Ok(SessionEnd::Cancelled(reason))
    }

    /// Best effort; failures are logged and never reach the client.
    ///
    /// Pending uploads are joined first, so a guide that becomes visible can
    /// be replayed in full.
    async fn persist(&self, state: &mut SessionState) {
        for upload in state.uploads.drain(..) {
            if let Err(e) = upload.await {
                warn!("Audio upload task for {} did not finish: {}", state.guide_id, e);
            }
        }

        let record = GuideRecord {
            guide_id: state.guide_id.clone(),
            device_id: state.request.device_id.clone(),
            spot: state.spot().map(str::to_string),
            title: state.title.clone(),
            confidence: state.candidate.as_ref().map(|c| c.confidence),
            transcript: state.transcript.clone(),
            duration_ms: state.ledger.total_duration_ms(),
            created_at: Utc::now(),
        };

        match self.store.persist_guide(record, state.ledger.segments()).await {
            Ok(()) => info!("Guide {} persisted ({} segments)", state.guide_id, state.ledger.len()),
            Err(e) => warn!("Failed to persist guide {}: {}", state.guide_id, e),
        }
    }
}

/// Prompt context for the narration collaborator
pub fn narration_context(request: &SessionRequest, candidate: Option<&Candidate>) -> String {
    let geo = &request.geo;
    let prefs = &request.prefs;

    let mut context = format!(
        "Location: latitude {}, longitude {} (accuracy about {} m).\n",
        geo.lat, geo.lng, geo.accuracy_m
    );

    match candidate {
        Some(c) => context.push_str(&format!(
            "The photo most likely shows: {} (confidence {:.2}).\n",
            c.spot, c.confidence
        )),
        None => context.push_str(
            "The place in the photo has not been identified; rely on the coordinates.\n",
        ),
    }

    context.push_str(
        "Give a visitor an engaging spoken introduction: what they are looking at, \
         its history, cultural significance and architecture.\n",
    );
    context.push_str(&format!(
        "Language: {}. Level of detail: {}.\n",
        prefs.language, prefs.detail_level
    ));
    if !prefs.interests.is_empty() {
        context.push_str(&format!("Visitor interests: {}.\n", prefs.interests.join(", ")));
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Geo, ImageSource, Preferences};

    fn request(interests: Vec<String>) -> SessionRequest {
        SessionRequest {
            device_id: "dev".to_string(),
            image: ImageSource::Base64("aGVsbG8=".to_string()),
            identify_id: None,
            geo: Geo {
                lat: 39.9,
                lng: 116.4,
                accuracy_m: 5.0,
            },
            prefs: Preferences {
                interests,
                ..Preferences::default()
            },
        }
    }

    #[test]
    fn test_context_with_candidate_and_interests() {
        let candidate = Candidate {
            spot: "Forbidden City".to_string(),
            confidence: 0.9,
            bbox: None,
        };
        let context = narration_context(
            &request(vec!["history".to_string(), "food".to_string()]),
            Some(&candidate),
        );

        assert!(context.contains("latitude 39.9, longitude 116.4"));
        assert!(context.contains("Forbidden City (confidence 0.90)"));
        assert!(context.contains("Language: zh-CN"));
        assert!(context.contains("Visitor interests: history, food."));
    }

    #[test]
    fn test_context_without_candidate() {
        let context = narration_context(&request(Vec::new()), None);
        assert!(context.contains("has not been identified"));
        assert!(!context.contains("Visitor interests"));
    }
}
