//! # Audio Module
//!
//! Handles the media half of the bridge: decoding audio payloads out of
//! inbound stream events and deciding which frames are worth forwarding.
//!
//! ## Key Components:
//! - **Media Frame**: one decoded unit of audio from a `media` event, with
//!   its track label (`inbound` vs `outbound` call leg)
//! - **Frame Filter**: silence suppression, so dead air never burns
//!   transcription-service quota
//!
//! ## Audio Format:
//! Twilio Media Streams deliver 8kHz mono mu-law, base64-encoded inside JSON
//! text frames. The bridge treats the decoded bytes as opaque — no
//! transcoding, no sample parsing — and passes them straight through to the
//! transcription service, which is told the encoding via query parameters.

pub mod filter; // Silence suppression
pub mod frame;  // Payload decoding and track labels

pub use filter::FrameFilter;
pub use frame::{MediaFrame, Track};
