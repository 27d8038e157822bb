//! # Media Frame Decoding
//!
//! Turns the `media` payload of an inbound stream event into raw audio bytes
//! plus a track label. Invalid base64 is a per-frame error: the frame is
//! dropped and the session carries on.

use crate::error::BridgeResult;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Which call leg a frame belongs to.
///
/// Only the inbound leg is forwarded for transcription: on conference calls
/// the outbound leg often carries echo and transcribes poorly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Track {
    Inbound,
    Outbound,
    Other(String),
}

impl Track {
    pub fn is_inbound(&self) -> bool {
        matches!(self, Track::Inbound)
    }
}

impl From<&str> for Track {
    fn from(label: &str) -> Self {
        match label {
            "inbound" => Track::Inbound,
            "outbound" => Track::Outbound,
            other => Track::Other(other.to_string()),
        }
    }
}

/// One decoded unit of audio extracted from a `media` event.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub track: Track,
    pub bytes: Vec<u8>,
}

impl MediaFrame {
    /// Decode a base64 media payload into a frame.
    ///
    /// A missing track label is treated as "unknown" (and therefore never
    /// forwarded), matching the upstream protocol where `track` is optional.
    pub fn decode(payload: &str, track: Option<&str>) -> BridgeResult<Self> {
        let bytes = STANDARD.decode(payload)?;

        Ok(Self {
            track: Track::from(track.unwrap_or("unknown")),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_decode_valid_payload() {
        let payload = STANDARD.encode([0x7fu8, 0x00, 0xff, 0x80]);
        let frame = MediaFrame::decode(&payload, Some("inbound")).unwrap();

        assert_eq!(frame.bytes, vec![0x7f, 0x00, 0xff, 0x80]);
        assert!(frame.track.is_inbound());
    }

    #[test]
    fn test_decode_invalid_base64() {
        let result = MediaFrame::decode("not//valid==base64!!", Some("inbound"));
        assert!(matches!(result, Err(BridgeError::DecodeError(_))));
    }

    #[test]
    fn test_track_labels() {
        assert_eq!(Track::from("inbound"), Track::Inbound);
        assert_eq!(Track::from("outbound"), Track::Outbound);
        assert_eq!(Track::from("both"), Track::Other("both".to_string()));

        assert!(!Track::from("outbound").is_inbound());
        assert!(!Track::from("unknown").is_inbound());
    }

    #[test]
    fn test_missing_track_is_not_inbound() {
        let payload = STANDARD.encode([1u8, 2, 3]);
        let frame = MediaFrame::decode(&payload, None).unwrap();
        assert!(!frame.track.is_inbound());
    }
}
