use super::state::AppState;
use crate::protocol::{Candidate, Geo, ImageSource};
use crate::storage::{GuideRecord, IdentifyRecord, StoredSegment};
use crate::upstream::bounded;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const DEFAULT_GUIDE_LIMIT: usize = 20;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    pub device_id: String,

    #[serde(default)]
    pub image_base64: Option<String>,

    #[serde(default)]
    pub image_url: Option<String>,

    pub geo: Geo,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub identify_id: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct GuideListQuery {
    /// Maximum number of guides to return (default: 20)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideSummary {
    pub guide_id: String,
    pub spot: Option<String>,
    pub title: String,
    pub confidence: Option<f32>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl From<GuideRecord> for GuideSummary {
    fn from(record: GuideRecord) -> Self {
        Self {
            guide_id: record.guide_id,
            spot: record.spot,
            title: record.title,
            confidence: record.confidence,
            duration_ms: record.duration_ms,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GuideListResponse {
    pub guides: Vec<GuideSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentView {
    pub seq: u32,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub bytes_len: Option<usize>,
    pub object_key: Option<String>,
}

impl From<StoredSegment> for SegmentView {
    fn from(row: StoredSegment) -> Self {
        Self {
            seq: row.seq,
            start_ms: row.start_ms,
            end_ms: row.end_ms,
            format: row.format,
            bitrate_kbps: row.bitrate_kbps,
            bytes_len: row.bytes_len,
            object_key: row.object_key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentListResponse {
    pub segments: Vec<SegmentView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// New identify session identifier: `id_` + 12 hex chars
fn new_identify_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("id_{}", &id[..12])
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/guide/identify
/// Identify the landmark in a photo without starting a guide
pub async fn identify(
    State(state): State<AppState>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("Rejected identify request: {}", rejection);
            return error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text());
        }
    };

    if req.device_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", "deviceId is required");
    }
    let image = match ImageSource::from_fields(req.image_base64.as_deref(), req.image_url.as_deref()) {
        Ok(image) => image,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.to_string()),
    };

    let identify_id = new_identify_id();
    info!("Identify {} for device {}", identify_id, req.device_id);

    let call = state.upstreams.vision.identify(&image, &req.geo);
    let candidates = match bounded("vision", state.upstreams.timeouts.vision, call).await {
        Ok(candidates) => candidates,
        Err(e) => {
            error!("Vision failed for {}: {}", identify_id, e);
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, "VISION_ERROR", e.to_string());
        }
    };

    let best = candidates.first();
    let record = IdentifyRecord {
        identify_id: identify_id.clone(),
        device_id: req.device_id,
        lat: req.geo.lat,
        lng: req.geo.lng,
        accuracy_m: req.geo.accuracy_m,
        spot: best.map(|c| c.spot.clone()),
        confidence: best.map(|c| c.confidence),
        bbox: best.and_then(|c| c.bbox.clone()),
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.create_identify_session(record).await {
        warn!("Failed to persist identify session {}: {}", identify_id, e);
    }

    info!("Identify {} returned {} candidate(s)", identify_id, candidates.len());
    (
        StatusCode::OK,
        Json(IdentifyResponse {
            identify_id,
            candidates,
        }),
    )
        .into_response()
}

/// GET /v1/guide/devices/:device_id/guides
/// Most recent guides for a device
pub async fn list_device_guides(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<GuideListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_GUIDE_LIMIT);

    match state.store.guides_by_device(&device_id, limit).await {
        Ok(guides) => (
            StatusCode::OK,
            Json(GuideListResponse {
                guides: guides.into_iter().map(GuideSummary::from).collect(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to list guides for {}: {}", device_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
        }
    }
}

/// GET /v1/guide/guides/:guide_id/segments
/// Persisted segment metadata for a guide
pub async fn get_guide_segments(
    State(state): State<AppState>,
    Path(guide_id): Path<String>,
) -> Response {
    match state.store.get_segments(&guide_id).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(SegmentListResponse {
                segments: rows.into_iter().map(SegmentView::from).collect(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to load segments for {}: {}", guide_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
