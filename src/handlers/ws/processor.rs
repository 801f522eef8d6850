//! WebSocket message dispatch and the per-session drain loop.
//!
//! Each decoded frame is routed off the envelope's discriminant: a
//! `language_switch` mutates the session synchronously, while queries join
//! the session's FIFO queue. A single drain task per session pops queries
//! in arrival order and runs the pipeline, which is what guarantees that
//! responses leave in the same order their queries were accepted.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, warn};

use crate::core::pipeline::{self, AudioArtifact, PipelineOptions};
use crate::core::session::{QueryInput, QueuedQuery, Session};
use crate::state::AppState;

use super::messages::{ClientMessage, ServerMessage};

/// Decode one inbound text frame and act on it.
///
/// Protocol errors are answered with an `error` envelope on the open
/// connection; they never terminate it.
pub(super) async fn handle_frame(
    frame: &str,
    session: &Arc<Session>,
    epoch: u64,
    state: &Arc<AppState>,
) {
    let message = match ClientMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(client_id = %session.client_id(), error = %e, "rejecting malformed frame");
            let _ = session
                .send_to(epoch, ServerMessage::error(e.to_string(), None))
                .await;
            return;
        }
    };

    match message {
        ClientMessage::LanguageSwitch { language } => {
            session.set_language(&language);
            info!(client_id = %session.client_id(), language = %language, "language switched");
            let _ = session
                .send_to(epoch, ServerMessage::status(format!("Language set to {language}")))
                .await;
        }
        ClientMessage::TextQuery { text } => {
            accept_query(QueryInput::Text(text), session, epoch, state);
        }
        ClientMessage::AudioQuery { audio } => {
            accept_query(QueryInput::Audio(audio), session, epoch, state);
        }
    }
}

fn accept_query(input: QueryInput, session: &Arc<Session>, epoch: u64, state: &Arc<AppState>) {
    let claimed_slot = session.enqueue(QueuedQuery { input, epoch });
    if claimed_slot {
        spawn_session_drain(state.clone(), session.clone());
    }
}

/// Work the session's queue until it runs dry.
///
/// At most one of these tasks exists per session at any instant (the queue's
/// drain flag enforces it), which keeps the session to a single in-flight
/// pipeline run.
fn spawn_session_drain(state: Arc<AppState>, session: Arc<Session>) {
    tokio::spawn(async move {
        let options = PipelineOptions::from_config(&state.config);
        while let Some(job) = session.next_queued() {
            match pipeline::run_query(&state.engines, &session, job.input, &options).await {
                Ok(output) => {
                    // The transcription echo renders the user's own
                    // utterance, so it must precede the response.
                    if let Some(transcript) = output.transcript {
                        let _ = session
                            .send_to(job.epoch, ServerMessage::user_echo(transcript))
                            .await;
                    }
                    let (audio_url, audio_base64) = deliver_audio(&state, output.audio).await;
                    let delivered = session
                        .send_to(
                            job.epoch,
                            ServerMessage::bot_response(output.answer, audio_url, audio_base64),
                        )
                        .await;
                    if !delivered {
                        debug!(
                            client_id = %session.client_id(),
                            "discarding response for a connection that went away"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        client_id = %session.client_id(),
                        stage = %e.stage,
                        error = %e.message,
                        "pipeline run failed"
                    );
                    let _ = session
                        .send_to(
                            job.epoch,
                            ServerMessage::error(e.message, Some(e.stage.to_string())),
                        )
                        .await;
                }
            }
        }
    });
}

/// Turn a synthesized artifact into the wire representation the config asks
/// for: inline base64, or a URL backed by the audio store.
pub(super) async fn deliver_audio(
    state: &Arc<AppState>,
    artifact: Option<AudioArtifact>,
) -> (Option<String>, Option<String>) {
    let Some(artifact) = artifact else {
        return (None, None);
    };
    if state.config.inline_audio {
        (None, Some(BASE64.encode(&artifact.data)))
    } else {
        let id = state.audio_store.insert(artifact.data).await;
        (Some(audio_url(state, &id)), None)
    }
}

fn audio_url(state: &Arc<AppState>, artifact_id: &str) -> String {
    match &state.config.public_base_url {
        Some(base) => format!("{}/audio/{artifact_id}", base.trim_end_matches('/')),
        None => format!("/audio/{artifact_id}"),
    }
}
