//! REST handlers: health probe and audio artifact downloads.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Live session count read from the registry.
    pub active_sessions: usize,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        active_sessions: state.registry.len(),
    })
}

/// Serve a synthesized audio artifact referenced by a `response` envelope's
/// `audio_url`. Artifacts expire from the store on a TTL.
pub async fn get_audio(
    Path(artifact_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<impl IntoResponse> {
    match state.audio_store.get(&artifact_id).await {
        Some(audio) => Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio)),
        None => Err(AppError::NotFound(format!("audio artifact {artifact_id}"))),
    }
}
