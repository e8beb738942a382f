use crate::session::{ReplayHandler, SessionController, StreamConfig};
use crate::storage::{GuideStore, ObjectStore};
use crate::upstream::Upstreams;
use std::sync::Arc;

/// Shared application state for HTTP and websocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Runs streaming sessions; one controller serves every channel
    pub controller: Arc<SessionController>,

    /// Replay/NACK requests against persisted guides
    pub replay: ReplayHandler,

    /// Guide records, segment metadata and identify sessions
    pub store: Arc<dyn GuideStore>,

    /// Upstream collaborators, used directly by the identify endpoint
    pub upstreams: Upstreams,
}

impl AppState {
    pub fn new(
        upstreams: Upstreams,
        store: Arc<dyn GuideStore>,
        objects: Arc<dyn ObjectStore>,
        stream: StreamConfig,
    ) -> Self {
        let controller = SessionController::new(
            upstreams.clone(),
            Arc::clone(&store),
            Arc::clone(&objects),
            stream,
        );
        Self {
            controller: Arc::new(controller),
            replay: ReplayHandler::new(Arc::clone(&store), objects),
            store,
            upstreams,
        }
    }
}
