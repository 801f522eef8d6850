//! Client-side collaborators.
//!
//! The server only needs the modules under `handlers`/`core`; these pieces
//! specify the client half of the contract: how a client re-establishes a
//! dropped connection, and how it plays synthesized responses back in
//! order.

pub mod playback;
pub mod reconnect;

pub use playback::{AudioRenderer, PlaybackError, PlaybackSequencer};
pub use reconnect::{ClientError, ReconnectPolicy, connect_with_retry};
