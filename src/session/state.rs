use super::ledger::SegmentLedger;
use crate::protocol::{Candidate, SessionRequest};
use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle of one streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    AwaitingInit,
    Identifying,
    Generating,
    Segmenting,
    Synthesizing,
    Delivering,
    Finalizing,
    ErrorReported,
    Closed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        if self.is_terminal() {
            return false;
        }
        // Error reporting and cancellation are reachable from any live phase
        if next == ErrorReported && self != ErrorReported {
            return true;
        }
        if next == Closed {
            return true;
        }

        matches!(
            (self, next),
            (AwaitingInit, Identifying)
                | (Identifying, Generating)
                | (Generating, Segmenting)
                | (Segmenting, Synthesizing)
                | (Segmenting, Finalizing)
                | (Synthesizing, Delivering)
                | (Synthesizing, Segmenting)
                | (Delivering, Segmenting)
        )
    }
}

/// Everything a session mutates, owned by the task running it
#[derive(Debug)]
pub struct SessionState {
    pub guide_id: String,
    pub request: SessionRequest,
    pub title: String,

    /// Best identification guess, if any
    pub candidate: Option<Candidate>,

    /// Concatenation of every `text` delta sent, in emission order
    pub transcript: String,

    /// Number of `text` deltas sent
    pub sentences_sent: usize,

    pub ledger: SegmentLedger,

    /// Detached audio uploads not yet joined
    pub uploads: Vec<JoinHandle<()>>,
    phase: SessionPhase,
}

impl SessionState {
    pub fn new(guide_id: String, request: SessionRequest) -> Self {
        let title = provisional_title(request.geo.lat, request.geo.lng);
        Self {
            ledger: SegmentLedger::new(guide_id.clone()),
            guide_id,
            request,
            title,
            candidate: None,
            transcript: String::new(),
            sentences_sent: 0,
            uploads: Vec::new(),
            phase: SessionPhase::AwaitingInit,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn transition(&mut self, next: SessionPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            bail!(
                "illegal session transition {:?} -> {:?} ({})",
                self.phase,
                next,
                self.guide_id
            );
        }
        debug!("Session {}: {:?} -> {:?}", self.guide_id, self.phase, next);
        self.phase = next;
        Ok(())
    }

    pub fn record_text(&mut self, delta: &str) {
        self.transcript.push_str(delta);
        self.sentences_sent += 1;
    }

    pub fn spot(&self) -> Option<&str> {
        self.candidate.as_ref().map(|c| c.spot.as_str())
    }
}

/// Title shown before identification finishes
pub fn provisional_title(lat: f64, lng: f64) -> String {
    format!("Exploring {:.4}, {:.4}", lat, lng)
}

/// New guide identifier: `guide_` + 12 hex chars
pub fn new_guide_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("guide_{}", &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Geo, ImageSource, Preferences};
    use SessionPhase::*;

    fn request() -> SessionRequest {
        SessionRequest {
            device_id: "dev".to_string(),
            image: ImageSource::Url("https://example.com/a.jpg".to_string()),
            identify_id: None,
            geo: Geo {
                lat: 39.9,
                lng: 116.4,
                accuracy_m: 5.0,
            },
            prefs: Preferences::default(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = SessionState::new(new_guide_id(), request());
        for next in [
            Identifying,
            Generating,
            Segmenting,
            Synthesizing,
            Delivering,
            Segmenting,
            Synthesizing,
            Segmenting,
            Finalizing,
            Closed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.phase().is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut state = SessionState::new(new_guide_id(), request());
        assert!(state.transition(Generating).is_err());
        state.transition(Identifying).unwrap();
        assert!(state.transition(Finalizing).is_err());
        assert_eq!(state.phase(), Identifying);
    }

    #[test]
    fn test_error_reported_from_any_live_phase() {
        for phase in [AwaitingInit, Identifying, Generating, Segmenting, Synthesizing, Delivering, Finalizing] {
            assert!(phase.can_transition_to(ErrorReported), "{:?}", phase);
        }
        assert!(!Closed.can_transition_to(ErrorReported));
        assert!(ErrorReported.can_transition_to(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Identifying));
    }

    #[test]
    fn test_guide_id_shape() {
        let id = new_guide_id();
        assert!(id.starts_with("guide_"));
        assert_eq!(id.len(), "guide_".len() + 12);
        assert!(id["guide_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_provisional_title_uses_coordinates() {
        assert_eq!(provisional_title(39.9, 116.4), "Exploring 39.9000, 116.4000");
    }
}
