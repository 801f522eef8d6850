//! Voice chat WebSocket handler.
//!
//! Owns the per-connection lifecycle: upgrade, session attach, greeting,
//! the read/dispatch loop, the serialized write path, and teardown. One
//! lightweight task runs per connection; an in-flight pipeline request
//! survives an abrupt disconnect but its result is discarded because the
//! connection epoch it was submitted under is no longer current.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use axum::Extension;
use futures::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::pipeline::AudioArtifact;
use crate::core::session::Session;
use crate::middleware::connection_limit::ClientIp;
use crate::state::AppState;

use super::messages::{MessageRoute, ServerMessage};
use super::processor;

/// Outbound channel depth per connection.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (16 MB; a full-size audio query plus
/// base64 overhead must fit)
const MAX_WS_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum WebSocket message size (16 MB)
const MAX_WS_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// How often the read loop checks for a stale connection.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum idle time before closing the connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Voice chat WebSocket handler for `GET /ws/{client_id}`.
///
/// Upgrades the HTTP connection and binds it to the client's session. The
/// server is always ready to accept a fresh connection for a previously
/// known client identifier; the session's retained language preference
/// applies immediately.
pub async fn ws_voice_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    info!(client_id = %client_id, "voice WebSocket connection upgrade requested");

    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, client_id, ip))
}

/// Run one connection to completion.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    client_id: String,
    client_ip: Option<std::net::IpAddr>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task: the only writer to the socket, so outbound messages for
    // this connection leave in the order they were produced.
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                MessageRoute::Message(message) => match message.encode() {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let (session, epoch) = state.registry.attach(&client_id, message_tx.clone());
    info!(client_id = %client_id, epoch, "voice session attached");

    send_greeting(&state, &session, epoch).await;

    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            frame = receiver.next() => {
                last_activity = std::time::Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        processor::handle_frame(&text, &session, epoch, &state).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Audio travels base64-encoded inside audio_query envelopes.
                        let _ = session
                            .send_to(
                                epoch,
                                ServerMessage::error(
                                    "Binary frames are not part of the protocol; send an audio_query envelope".to_string(),
                                    None,
                                ),
                            )
                            .await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(client_id = %client_id, "voice WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, "voice WebSocket transport error: {}", e);
                        break;
                    }
                    None => {
                        info!(client_id = %client_id, "voice WebSocket connection ended");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        client_id = %client_id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "closing stale voice WebSocket connection"
                    );
                    let _ = message_tx.send(MessageRoute::Close).await;
                    break;
                }
            }
        }
    }

    // Detach before tearing the write path down: any in-flight pipeline run
    // keeps executing, but its epoch is no longer deliverable.
    session.detach(epoch);
    sender_task.abort();
    if let Some(ip) = client_ip {
        state.release_connection(ip);
    }
    info!(client_id = %client_id, epoch, "voice session detached");
}

/// Open the conversation with the configured greeting, spoken when the
/// synthesizer cooperates and text-only when it does not.
async fn send_greeting(state: &Arc<AppState>, session: &Arc<Session>, epoch: u64) {
    let greeting = state.config.greeting_text.clone();
    let language = session.language();

    let audio = match tokio::time::timeout(
        state.config.stage_timeout(),
        state.engines.synthesizer.synthesize(&greeting, &language),
    )
    .await
    {
        Ok(Ok(data)) => Some(AudioArtifact {
            sequence: session.next_artifact_seq(),
            language: crate::utils::text::speech_language(&language).to_string(),
            data,
        }),
        Ok(Err(e)) => {
            warn!(client_id = %session.client_id(), error = %e, "greeting synthesis failed");
            None
        }
        Err(_) => {
            warn!(client_id = %session.client_id(), "greeting synthesis timed out");
            None
        }
    };

    let (audio_url, audio_base64) = processor::deliver_audio(state, audio).await;
    let _ = session
        .send_to(epoch, ServerMessage::bot_response(greeting, audio_url, audio_base64))
        .await;
}
