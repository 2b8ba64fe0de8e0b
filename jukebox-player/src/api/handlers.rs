//! HTTP request handlers

use super::AppState;
use crate::cache::Asset;
use crate::error::{AdmissionError, Error, VoteError};
use crate::orchestrator::EnqueueReceipt;
use crate::playback::NowPlaying;
use crate::vote::VoteOutcome;
use axum::{extract::State, http::StatusCode, Json};
use jukebox_common::events::PlaybackState;
use jukebox_common::human_time::format_clock;
use jukebox_common::Fingerprint;
use serde::{Deserialize, Serialize};
use std::time::UNIX_EPOCH;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(StatusResponse {
            status: message.into(),
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    pub requester: String,
}

#[derive(Debug, Serialize)]
pub struct QueueEntry {
    pub request_id: Uuid,
    pub url: String,
    pub requester: String,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub now_playing: Option<NowPlaying>,
    pub queue: Vec<QueueEntry>,
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub voter: String,
    pub listeners: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct PauseRequest {
    /// Explicit intent; toggles when omitted
    #[serde(default)]
    pub paused: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub paused: bool,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: PlaybackState,
    pub paused: bool,
    pub votes: usize,
    pub now_playing: Option<NowPlaying>,
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AssetInfo {
    pub fingerprint: Fingerprint,
    pub title: String,
    pub duration: Option<String>,
    pub file: String,
    pub created_at_unix: u64,
}

impl From<&Asset> for AssetInfo {
    fn from(asset: &Asset) -> Self {
        Self {
            fingerprint: asset.fingerprint.clone(),
            title: asset.title.clone(),
            duration: asset.duration.map(format_clock),
            file: asset
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            created_at_unix: asset
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Queue Endpoints
// ============================================================================

/// POST /queue - Request a track
pub async fn enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueReceipt>), ApiError> {
    match state.orchestrator.enqueue(&req.url, &req.requester) {
        Ok(receipt) => Ok((StatusCode::ACCEPTED, Json(receipt))),
        Err(e @ AdmissionError::InvalidLocator(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e @ AdmissionError::QueueFull { .. }) => {
            Err(api_error(StatusCode::TOO_MANY_REQUESTS, e.to_string()))
        }
    }
}

/// GET /queue - Now playing plus waiting requests
pub async fn get_queue(State(state): State<AppState>) -> Json<QueueResponse> {
    let orchestrator = &state.orchestrator;
    let queue = orchestrator
        .queue_snapshot()
        .into_iter()
        .map(|r| QueueEntry {
            request_id: r.id,
            url: r.locator.url().to_string(),
            requester: r.requester,
            enqueued_at: r.enqueued_at,
        })
        .collect();

    Json(QueueResponse {
        now_playing: orchestrator.now_playing(),
        queue,
        capacity: orchestrator.settings().max_requests,
    })
}

/// POST /request - Fetch a track into the cache without playing it
pub async fn fetch_only(
    State(state): State<AppState>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<AssetInfo>, ApiError> {
    match state.orchestrator.fetch_only(&req.url).await {
        Ok(asset) => Ok(Json(AssetInfo::from(asset.as_ref()))),
        Err(Error::Admission(e)) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(api_error(StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

// ============================================================================
// Playback Control Endpoints
// ============================================================================

/// POST /vote - Vote to skip the current track
pub async fn vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>, ApiError> {
    match state.orchestrator.vote(&req.voter, req.listeners) {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e @ (VoteError::NothingPlaying | VoteError::ItemChanged)) => {
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
    }
}

/// POST /playback/pause - Set or toggle pause
pub async fn pause(
    State(state): State<AppState>,
    body: Option<Json<PauseRequest>>,
) -> Json<PauseResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let paused = match req.paused {
        Some(paused) => {
            state.orchestrator.set_pause(paused);
            paused
        }
        None => state.orchestrator.toggle_pause(),
    };
    info!("Pause set to {}", paused);
    Json(PauseResponse { paused })
}

/// POST /playback/skip - Skip the current track without a vote
pub async fn skip(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    if state.orchestrator.force_skip() {
        Ok(Json(StatusResponse {
            status: "skipping".to_string(),
        }))
    } else {
        Err(api_error(StatusCode::CONFLICT, "Nothing is playing"))
    }
}

/// GET /playback/state
pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    let orchestrator = &state.orchestrator;
    Json(StateResponse {
        state: orchestrator.playback_state(),
        paused: orchestrator.is_paused(),
        votes: orchestrator.votes(),
        now_playing: orchestrator.now_playing(),
    })
}

// ============================================================================
// Cache Endpoints
// ============================================================================

/// GET /cache - Tracked assets, oldest first
pub async fn get_cache(State(state): State<AppState>) -> Json<Vec<AssetInfo>> {
    let assets = state.orchestrator.cache().snapshot().await;
    Json(assets.iter().map(|a| AssetInfo::from(a.as_ref())).collect())
}
