//! Voice chat WebSocket handlers.
//!
//! # Protocol
//!
//! The endpoint is `GET /ws/{client_id}`; the path segment selects the
//! session (and the client's retrieval collection).
//!
//! ## Client → Server
//!
//! - **text_query**: typed question (`text`)
//! - **audio_query**: spoken question (`audio_data`, base64)
//! - **language_switch**: change the session language (`language`)
//!
//! ## Server → Client
//!
//! - **response**: answer text plus `audio_url` or `audio_base64` when
//!   synthesis succeeded
//! - **user_message**: echo of a transcribed utterance, sent before its
//!   response
//! - **error**: failed request, tagged with the failing pipeline stage
//! - **status**: informational acknowledgement (language switch)

mod handler;
pub mod messages;
mod processor;

pub use handler::ws_voice_handler;
