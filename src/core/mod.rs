pub mod audio_store;
pub mod generation;
pub mod pipeline;
pub mod retrieval;
pub mod session;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use audio_store::AudioStore;
pub use generation::{AnswerRequest, GenerationError, Generator, LlmConfig, create_generator};
pub use pipeline::{
    AudioArtifact, PipelineEngines, PipelineError, PipelineInitError, PipelineOptions,
    PipelineOutput, PipelineStage, run_query,
};
pub use retrieval::{Passage, RetrievalConfig, RetrievalError, Retriever, create_retriever};
pub use session::{ConnectionHandle, QueryInput, QueuedQuery, Session, SessionRegistry};
pub use stt::{SttConfig, Transcriber, TranscriptionError, create_transcriber};
pub use tts::{Synthesizer, SynthesisError, TtsConfig, create_synthesizer};
