//! HTTP API server for mobile clients
//!
//! This module provides the REST API and the streaming websocket:
//! - GET /v1/guide/stream - Streaming guide channel (websocket)
//! - POST /v1/guide/identify - Identify a landmark from a photo
//! - GET /v1/guide/devices/:id/guides - Recent guides for a device
//! - GET /v1/guide/guides/:id/segments - Segment metadata for a guide
//! - GET /health, GET /v1/guide/health - Health check

mod handlers;
mod routes;
mod state;
mod ws;

pub use handlers::{
    ErrorResponse, GuideListResponse, GuideSummary, IdentifyRequest, IdentifyResponse,
    SegmentListResponse, SegmentView,
};
pub use routes::create_router;
pub use state::AppState;
