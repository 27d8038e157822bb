//! # Transcription Module
//!
//! Speech-to-text via the Deepgram real-time WebSocket API. Each bridge
//! session lazily opens one [`link::TranscriptionLink`] when its stream
//! starts, forwards inbound audio over it as binary frames, and receives
//! typed result events back on a background task.
//!
//! ## Key Components:
//! - **Link**: connection lifecycle (`Disconnected -> Connecting -> Open ->
//!   Closed`), non-blocking connect, fire-and-forget close
//! - **Messages**: typed model of the service's JSON responses and the rule
//!   for which transcripts get reported (final and non-empty only)

pub mod link;     // Outbound connection lifecycle
pub mod messages; // Service response model

pub use link::{LinkState, TranscriptionLink};
pub use messages::FinalTranscript;
