//! In-order, one-at-a-time playback of synthesized responses.
//!
//! Artifacts can reach the client out of arrival order (a later response
//! may decode faster); ordering is derived from the sequence number each
//! artifact was assigned when its request completed, never from arrival
//! time. The sequencer holds early arrivals until their turn and renders
//! exactly one artifact at a time.
//!
//! A render failure (e.g. playback blocked by an autoplay policy) pauses
//! the queue and is reported; [`PlaybackSequencer::resume`] skips the
//! failed artifact and continues, so the queue can never deadlock waiting
//! for an event that may never occur.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::core::pipeline::AudioArtifact;

/// Errors surfaced by an audio renderer.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Starting playback was refused (e.g. by an external policy).
    #[error("Playback start blocked: {0}")]
    StartBlocked(String),

    /// The renderer failed mid-playback.
    #[error("Playback failed: {0}")]
    RenderFailed(String),
}

/// Renders one artifact to completion.
///
/// The sequencer awaits each call before starting the next artifact, so an
/// implementation does not need its own mutual exclusion.
#[async_trait]
pub trait AudioRenderer: Send + Sync {
    async fn render(&self, artifact: &AudioArtifact) -> Result<(), PlaybackError>;
}

enum Command {
    Enqueue(AudioArtifact),
    Resume,
}

/// Single-consumer FIFO over sequence-numbered audio artifacts.
pub struct PlaybackSequencer {
    tx: mpsc::UnboundedSender<Command>,
}

impl PlaybackSequencer {
    /// Start a sequencer expecting sequence numbers from 1.
    pub fn new(renderer: Arc<dyn AudioRenderer>) -> Self {
        Self::with_first_sequence(renderer, 1)
    }

    /// Start a sequencer expecting `first` as the next sequence number.
    pub fn with_first_sequence(renderer: Arc<dyn AudioRenderer>, first: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_sequencer(renderer, rx, first));
        Self { tx }
    }

    /// Hand an artifact to the sequencer. Playback starts when every lower
    /// sequence number has finished (or been skipped).
    pub fn enqueue(&self, artifact: AudioArtifact) {
        let _ = self.tx.send(Command::Enqueue(artifact));
    }

    /// Manual escape after a reported playback failure: skip the failed
    /// artifact and continue with the rest of the queue.
    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }
}

async fn run_sequencer(
    renderer: Arc<dyn AudioRenderer>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    first: u64,
) {
    let mut pending: BTreeMap<u64, AudioArtifact> = BTreeMap::new();
    let mut next = first;
    let mut paused = false;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Enqueue(artifact) => {
                if artifact.sequence < next {
                    warn!(sequence = artifact.sequence, "dropping stale artifact");
                } else if pending.insert(artifact.sequence, artifact).is_some() {
                    warn!("replaced artifact with duplicate sequence number");
                }
            }
            Command::Resume => {
                if paused {
                    // The failed artifact was already taken off the queue;
                    // move past it.
                    paused = false;
                    next += 1;
                    debug!(next, "playback resumed");
                }
            }
        }

        while !paused {
            let Some(artifact) = pending.remove(&next) else {
                break;
            };
            match renderer.render(&artifact).await {
                Ok(()) => {
                    debug!(sequence = artifact.sequence, "artifact played");
                    next += 1;
                }
                Err(e) => {
                    error!(
                        sequence = artifact.sequence,
                        error = %e,
                        "playback failed; call resume() to skip and continue"
                    );
                    paused = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct RecordingRenderer {
        played: Mutex<Vec<u64>>,
        active: AtomicBool,
        fail_sequence: Option<u64>,
    }

    impl RecordingRenderer {
        fn new(fail_sequence: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                played: Mutex::new(Vec::new()),
                active: AtomicBool::new(false),
                fail_sequence,
            })
        }

        fn played(&self) -> Vec<u64> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AudioRenderer for RecordingRenderer {
        async fn render(&self, artifact: &AudioArtifact) -> Result<(), PlaybackError> {
            assert!(
                !self.active.swap(true, Ordering::SeqCst),
                "a second artifact started while one was active"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
            let result = if self.fail_sequence == Some(artifact.sequence) {
                Err(PlaybackError::StartBlocked("autoplay refused".to_string()))
            } else {
                self.played.lock().unwrap().push(artifact.sequence);
                Ok(())
            };
            self.active.store(false, Ordering::SeqCst);
            result
        }
    }

    fn artifact(sequence: u64) -> AudioArtifact {
        AudioArtifact {
            sequence,
            language: "en".to_string(),
            data: Bytes::from_static(b"mp3"),
        }
    }

    async fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_plays_in_sequence_order_despite_arrival_order() {
        let renderer = RecordingRenderer::new(None);
        let sequencer = PlaybackSequencer::new(renderer.clone());

        sequencer.enqueue(artifact(3));
        sequencer.enqueue(artifact(1));
        sequencer.enqueue(artifact(2));

        wait_for(|| renderer.played().len() == 3).await;
        assert_eq!(renderer.played(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_waits_for_missing_sequence() {
        let renderer = RecordingRenderer::new(None);
        let sequencer = PlaybackSequencer::new(renderer.clone());

        sequencer.enqueue(artifact(2));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(renderer.played().is_empty(), "2 must wait for 1");

        sequencer.enqueue(artifact(1));
        wait_for(|| renderer.played().len() == 2).await;
        assert_eq!(renderer.played(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failure_pauses_until_manual_resume() {
        let renderer = RecordingRenderer::new(Some(2));
        let sequencer = PlaybackSequencer::new(renderer.clone());

        sequencer.enqueue(artifact(1));
        sequencer.enqueue(artifact(2));
        sequencer.enqueue(artifact(3));

        wait_for(|| renderer.played() == vec![1]).await;
        // Artifact 2 failed; 3 must not start on its own.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(renderer.played(), vec![1]);

        sequencer.resume();
        wait_for(|| renderer.played() == vec![1, 3]).await;
    }

    #[tokio::test]
    async fn test_stale_artifact_is_dropped() {
        let renderer = RecordingRenderer::new(None);
        let sequencer = PlaybackSequencer::with_first_sequence(renderer.clone(), 5);

        sequencer.enqueue(artifact(4));
        sequencer.enqueue(artifact(5));
        wait_for(|| renderer.played() == vec![5]).await;
    }
}
