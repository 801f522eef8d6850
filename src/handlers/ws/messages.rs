//! Voice chat WebSocket message types.
//!
//! Defines the typed envelopes exchanged over `/ws/{client_id}` and the
//! codec that validates them. Decoding is strict: an unknown `type` tag or
//! a missing/mistyped field yields a [`ProtocolError`], never a partially
//! populated message. Encoding maps every server message to exactly one
//! JSON frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Maximum allowed size for query text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for a base64 audio payload (10 MB)
pub const MAX_AUDIO_SIZE: usize = 10 * 1024 * 1024;

/// Error type for frames that fail to decode into a client message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a recognized envelope (bad JSON, unknown `type`
    /// tag, or missing/mistyped fields for the declared type).
    #[error("Unsupported or malformed message: {0}")]
    InvalidEnvelope(String),

    /// `audio_data` is not valid base64.
    #[error("Audio payload is not valid base64: {0}")]
    InvalidAudioEncoding(String),

    /// `audio_data` decoded to zero bytes.
    #[error("Audio payload decoded to zero bytes")]
    EmptyAudio,

    /// A payload field exceeds its size limit.
    #[error("`{field}` exceeds the {max} byte limit")]
    PayloadTooLarge { field: &'static str, max: usize },
}

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Wire shape of client envelopes; only used by the decoder.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "text_query")]
    TextQuery { text: String },

    #[serde(rename = "audio_query")]
    AudioQuery { audio_data: String },

    #[serde(rename = "language_switch")]
    LanguageSwitch { language: String },
}

/// A validated client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Typed question text.
    TextQuery { text: String },
    /// Spoken question, already decoded from its transport encoding.
    AudioQuery { audio: Bytes },
    /// Switch the session's active language for subsequent requests.
    LanguageSwitch { language: String },
}

impl ClientMessage {
    /// Decode and validate one inbound frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let wire: ClientFrame = serde_json::from_str(frame)
            .map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))?;

        match wire {
            ClientFrame::TextQuery { text } => {
                if text.len() > MAX_TEXT_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        field: "text",
                        max: MAX_TEXT_SIZE,
                    });
                }
                Ok(ClientMessage::TextQuery { text })
            }
            ClientFrame::AudioQuery { audio_data } => {
                if audio_data.len() > MAX_AUDIO_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        field: "audio_data",
                        max: MAX_AUDIO_SIZE,
                    });
                }
                let audio = BASE64
                    .decode(audio_data.as_bytes())
                    .map_err(|e| ProtocolError::InvalidAudioEncoding(e.to_string()))?;
                if audio.is_empty() {
                    return Err(ProtocolError::EmptyAudio);
                }
                Ok(ClientMessage::AudioQuery {
                    audio: Bytes::from(audio),
                })
            }
            ClientFrame::LanguageSwitch { language } => {
                let language = language.trim().to_string();
                if language.is_empty() {
                    return Err(ProtocolError::InvalidEnvelope(
                        "language_switch requires a non-empty language tag".to_string(),
                    ));
                }
                Ok(ClientMessage::LanguageSwitch { language })
            }
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The assistant's answer, with synthesized speech when available.
    #[serde(rename = "response")]
    Response {
        sender: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_base64: Option<String>,
    },

    /// Echo of the user's transcribed utterance, sent before the response.
    #[serde(rename = "user_message")]
    UserMessage { sender: String, text: String },

    /// A failed request, tagged with the failing pipeline stage when known.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },

    /// Informational acknowledgement (e.g. a language switch).
    #[serde(rename = "status")]
    Status { message: String },
}

impl ServerMessage {
    pub fn bot_response(
        text: String,
        audio_url: Option<String>,
        audio_base64: Option<String>,
    ) -> Self {
        ServerMessage::Response {
            sender: "bot".to_string(),
            text,
            audio_url,
            audio_base64,
        }
    }

    pub fn user_echo(text: String) -> Self {
        ServerMessage::UserMessage {
            sender: "user".to_string(),
            text,
        }
    }

    pub fn error(message: String, stage: Option<String>) -> Self {
        ServerMessage::Error { message, stage }
    }

    pub fn status(message: impl Into<String>) -> Self {
        ServerMessage::Status {
            message: message.into(),
        }
    }

    /// Encode the message as one JSON frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Outbound routing for the per-connection sender task.
pub enum MessageRoute {
    /// JSON text message
    Message(ServerMessage),
    /// Close connection
    Close,
}
