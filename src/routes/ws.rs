//! Voice chat WebSocket route configuration.
//!
//! # Endpoint
//!
//! `GET /ws/{client_id}` - WebSocket upgrade for the conversation pipeline
//!
//! # Protocol
//!
//! After the upgrade the server opens with a greeting `response`, then
//! answers each `text_query`/`audio_query` envelope with a `response`
//! (preceded by a `user_message` echo for spoken input). See
//! [`crate::handlers::ws`] for the full envelope list.
//!
//! # Example
//!
//! ```json
//! // Client sends
//! {"type": "text_query", "text": "What is the full form of AI?"}
//!
//! // Server responds
//! {"type": "response", "sender": "bot", "text": "...", "audio_base64": "..."}
//! ```

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_voice_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the voice WebSocket router
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{client_id}", get(ws_voice_handler))
        .layer(TraceLayer::new_for_http())
}
