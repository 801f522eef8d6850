//! REST route configuration.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router: health probe plus audio artifact downloads.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/audio/{artifact_id}", get(api::get_audio))
        .layer(TraceLayer::new_for_http())
}
